//! Portfolio analysis
//!
//! Pure arithmetic over freshly fetched positions. Nothing here talks to
//! the brokerage; the dispatcher fetches and passes the data in.

use crate::models::{
    Account, Allocation, PortfolioSummary, Position, Quote, SharesEstimate, TotalReturn,
};
use std::cmp::Ordering;

fn by_plpc(a: &Position, b: &Position) -> Ordering {
    a.unrealized_plpc
        .partial_cmp(&b.unrealized_plpc)
        .unwrap_or(Ordering::Equal)
}

pub fn portfolio_summary(account: Option<Account>, positions: Vec<Position>) -> Option<PortfolioSummary> {
    let account = account?;
    Some(PortfolioSummary {
        cash: account.cash,
        portfolio_value: account.portfolio_value,
        equity: account.equity,
        buying_power: account.buying_power,
        positions,
    })
}

/// Highest unrealized P/L % first. Ties keep their original order.
pub fn best_performers(mut positions: Vec<Position>, limit: usize) -> Vec<Position> {
    positions.sort_by(|a, b| by_plpc(b, a));
    positions.truncate(limit);
    positions
}

/// Lowest unrealized P/L % first. Ties keep their original order.
pub fn worst_performers(mut positions: Vec<Position>, limit: usize) -> Vec<Position> {
    positions.sort_by(by_plpc);
    positions.truncate(limit);
    positions
}

/// Share of portfolio value held in each position, largest first.
pub fn position_allocation(account: Option<&Account>, positions: &[Position]) -> Vec<Allocation> {
    let account = match account {
        Some(account) if !positions.is_empty() => account,
        _ => return Vec::new(),
    };

    let portfolio_value = account.portfolio_value;
    let mut allocations: Vec<Allocation> = positions
        .iter()
        .map(|p| Allocation {
            symbol: p.symbol.clone(),
            market_value: p.market_value,
            allocation_pct: if portfolio_value > 0.0 {
                p.market_value / portfolio_value * 100.0
            } else {
                0.0
            },
            qty: p.qty,
        })
        .collect();

    allocations.sort_by(|a, b| {
        b.allocation_pct
            .partial_cmp(&a.allocation_pct)
            .unwrap_or(Ordering::Equal)
    });
    allocations
}

pub fn concentrated_positions(allocations: Vec<Allocation>, threshold_pct: f64) -> Vec<Allocation> {
    allocations
        .into_iter()
        .filter(|a| a.allocation_pct >= threshold_pct)
        .collect()
}

/// Largest position by market value; the first one wins a tie.
pub fn largest_position(positions: &[Position]) -> Option<Position> {
    positions
        .iter()
        .fold(None::<&Position>, |best, p| match best {
            Some(b) if b.market_value >= p.market_value => Some(b),
            _ => Some(p),
        })
        .cloned()
}

/// Smallest position by market value; the first one wins a tie.
pub fn smallest_position(positions: &[Position]) -> Option<Position> {
    positions
        .iter()
        .fold(None::<&Position>, |best, p| match best {
            Some(b) if b.market_value <= p.market_value => Some(b),
            _ => Some(p),
        })
        .cloned()
}

pub fn total_return(positions: &[Position]) -> TotalReturn {
    let total_unrealized_pl: f64 = positions.iter().map(|p| p.unrealized_pl).sum();
    let total_market_value: f64 = positions.iter().map(|p| p.market_value).sum();
    let total_cost_basis: f64 = positions.iter().map(|p| p.qty * p.avg_entry_price).sum();

    let total_return_pct = if total_cost_basis > 0.0 {
        total_unrealized_pl / total_cost_basis * 100.0
    } else {
        0.0
    };

    TotalReturn {
        total_unrealized_pl,
        total_market_value,
        total_cost_basis,
        total_return_pct,
        position_count: positions.len(),
        winning_positions: positions.iter().filter(|p| p.unrealized_pl > 0.0).count(),
        losing_positions: positions.iter().filter(|p| p.unrealized_pl < 0.0).count(),
    }
}

/// How many shares `dollar_amount` buys at the current ask.
pub fn shares_for_dollars(quote: &Quote, dollar_amount: f64) -> Option<SharesEstimate> {
    let ask_price = quote.ask_price;
    if ask_price <= 0.0 {
        return None;
    }

    let shares = dollar_amount / ask_price;
    let whole_shares = shares.floor() as u64;

    Some(SharesEstimate {
        symbol: quote.symbol.clone(),
        dollar_amount,
        ask_price,
        shares,
        whole_shares,
        estimated_cost: shares * ask_price,
        estimated_cost_whole: whole_shares as f64 * ask_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position(symbol: &str, market_value: f64, plpc: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            qty: 10.0,
            market_value,
            avg_entry_price: market_value / 10.0,
            current_price: market_value / 10.0,
            unrealized_pl: plpc * market_value,
            unrealized_plpc: plpc,
        }
    }

    fn account(portfolio_value: f64) -> Account {
        Account {
            cash: 0.0,
            portfolio_value,
            buying_power: 0.0,
            equity: portfolio_value,
        }
    }

    fn symbols<T>(items: &[T], f: impl Fn(&T) -> &str) -> Vec<String> {
        items.iter().map(|i| f(i).to_string()).collect()
    }

    #[test]
    fn test_best_and_worst_are_stable_under_ties() {
        let positions = vec![
            position("A", 100.0, 0.05),
            position("B", 100.0, 0.10),
            position("C", 100.0, 0.05),
            position("D", 100.0, -0.02),
        ];

        let best = best_performers(positions.clone(), 5);
        assert_eq!(symbols(best.as_slice(), |p| p.symbol.as_str()), ["B", "A", "C", "D"]);

        let worst = worst_performers(positions.clone(), 3);
        assert_eq!(symbols(worst.as_slice(), |p| p.symbol.as_str()), ["D", "A", "C"]);

        assert_eq!(best_performers(positions, 1).len(), 1);
    }

    #[test]
    fn test_allocation_percentages() {
        let positions = vec![position("MSFT", 400.0, 0.0), position("AAPL", 600.0, 0.0)];
        let allocations = position_allocation(Some(&account(1000.0)), &positions);

        assert_eq!(symbols(allocations.as_slice(), |a| a.symbol.as_str()), ["AAPL", "MSFT"]);
        assert!((allocations[0].allocation_pct - 60.0).abs() < 1e-9);
        assert!((allocations[1].allocation_pct - 40.0).abs() < 1e-9);

        let total: f64 = allocations.iter().map(|a| a.allocation_pct).sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_allocation_edge_cases() {
        let positions = vec![position("AAPL", 600.0, 0.0)];
        assert!(position_allocation(None, &positions).is_empty());
        assert!(position_allocation(Some(&account(1000.0)), &[]).is_empty());

        let zero = position_allocation(Some(&account(0.0)), &positions);
        assert_eq!(zero[0].allocation_pct, 0.0);
    }

    #[test]
    fn test_concentrated_positions_threshold_inclusive() {
        let positions = vec![
            position("A", 700.0, 0.0),
            position("B", 200.0, 0.0),
            position("C", 100.0, 0.0),
        ];
        let allocations = position_allocation(Some(&account(1000.0)), &positions);
        let concentrated = concentrated_positions(allocations, 20.0);
        assert_eq!(symbols(concentrated.as_slice(), |a| a.symbol.as_str()), ["A", "B"]);
    }

    #[test]
    fn test_largest_and_smallest() {
        let positions = vec![
            position("A", 300.0, 0.0),
            position("B", 900.0, 0.0),
            position("C", 100.0, 0.0),
            position("D", 900.0, 0.0),
        ];
        assert_eq!(largest_position(&positions).unwrap().symbol, "B");
        assert_eq!(smallest_position(&positions).unwrap().symbol, "C");
        assert!(largest_position(&[]).is_none());
    }

    #[test]
    fn test_total_return() {
        let positions = vec![
            Position {
                symbol: "A".into(),
                qty: 10.0,
                market_value: 1100.0,
                avg_entry_price: 100.0,
                current_price: 110.0,
                unrealized_pl: 100.0,
                unrealized_plpc: 0.1,
            },
            Position {
                symbol: "B".into(),
                qty: 5.0,
                market_value: 450.0,
                avg_entry_price: 100.0,
                current_price: 90.0,
                unrealized_pl: -50.0,
                unrealized_plpc: -0.1,
            },
        ];

        let result = total_return(&positions);
        assert_eq!(result.total_cost_basis, 1500.0);
        assert_eq!(result.total_unrealized_pl, 50.0);
        assert!((result.total_return_pct - 50.0 / 1500.0 * 100.0).abs() < 1e-9);
        assert_eq!(result.winning_positions, 1);
        assert_eq!(result.losing_positions, 1);

        let empty = total_return(&[]);
        assert_eq!(empty.position_count, 0);
        assert_eq!(empty.total_return_pct, 0.0);
    }

    #[test]
    fn test_shares_for_dollars() {
        let quote = Quote {
            symbol: "AAPL".into(),
            bid_price: 199.0,
            ask_price: 200.0,
            bid_size: 1.0,
            ask_size: 1.0,
            timestamp: Utc::now(),
        };

        let estimate = shares_for_dollars(&quote, 500.0).unwrap();
        assert_eq!(estimate.shares, 2.5);
        assert_eq!(estimate.whole_shares, 2);
        assert_eq!(estimate.estimated_cost_whole, 400.0);

        let free = Quote { ask_price: 0.0, ..quote };
        assert!(shares_for_dollars(&free, 500.0).is_none());
    }

    #[test]
    fn test_summary_requires_account() {
        assert!(portfolio_summary(None, vec![]).is_none());
        let summary = portfolio_summary(Some(account(10.0)), vec![position("A", 1.0, 0.0)]).unwrap();
        assert_eq!(summary.positions.len(), 1);
    }
}
