//! Portfolio report over closed paper positions.
//!
//! Equity starts at zero and walks trade by trade in close order, which
//! gives max drawdown its meaning: the deepest drop from the running peak.
//! Zero-PnL closes break both streaks and count as neither win nor loss,
//! but they stay in the trade count that win rate and expectancy are
//! measured against.

use serde::Serialize;

use crate::models::positions::PaperPosition;
use crate::utils::{mean, round_to};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PortfolioSummary {
    /// Closed positions considered, including zero-PnL ones.
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
    pub max_drawdown: f64,
    pub max_win_streak: usize,
    pub max_loss_streak: usize,
    pub final_equity: f64,
}

pub fn portfolio_summary(closed: &[PaperPosition]) -> PortfolioSummary {
    let mut ordered: Vec<&PaperPosition> = closed.iter().collect();
    ordered.sort_by_key(|p| p.closed_at.unwrap_or(p.created_at));

    let mut equity = 0.0;
    let mut peak = 0.0f64;
    let mut max_drawdown = 0.0f64;
    let mut win_pnls = Vec::new();
    let mut loss_pnls = Vec::new();
    let mut win_streak = 0usize;
    let mut loss_streak = 0usize;
    let mut max_win_streak = 0usize;
    let mut max_loss_streak = 0usize;

    for position in &ordered {
        let pnl = position.realized_pnl;
        equity += pnl;
        peak = peak.max(equity);
        max_drawdown = max_drawdown.max(peak - equity);

        if pnl > 0.0 {
            win_pnls.push(pnl);
            win_streak += 1;
            loss_streak = 0;
            max_win_streak = max_win_streak.max(win_streak);
        } else if pnl < 0.0 {
            loss_pnls.push(pnl);
            loss_streak += 1;
            win_streak = 0;
            max_loss_streak = max_loss_streak.max(loss_streak);
        } else {
            win_streak = 0;
            loss_streak = 0;
        }
    }

    let wins = win_pnls.len();
    let losses = loss_pnls.len();
    let avg_win = mean(&win_pnls);
    let avg_loss = mean(&loss_pnls);
    // Zero-PnL closes stay in the denominator and drag both numbers down.
    let total = ordered.len();
    let (win_rate, expectancy) = if total > 0 {
        let win_share = wins as f64 / total as f64;
        let loss_share = losses as f64 / total as f64;
        (win_share, win_share * avg_win + loss_share * avg_loss)
    } else {
        (0.0, 0.0)
    };

    PortfolioSummary {
        trades: ordered.len(),
        wins,
        losses,
        win_rate: round_to(win_rate, 4),
        avg_win: round_to(avg_win, 8),
        avg_loss: round_to(avg_loss, 8),
        expectancy: round_to(expectancy, 8),
        max_drawdown: round_to(max_drawdown, 8),
        max_win_streak,
        max_loss_streak,
        final_equity: round_to(equity, 8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PositionStatus, TradeDirection};

    fn closed_position(closed_at: i64, pnl: f64) -> PaperPosition {
        PaperPosition {
            id: format!("POS-{closed_at}"),
            symbol: "BTCUSDT".into(),
            side: TradeDirection::Long,
            entry: 100.0,
            qty: 1.0,
            sl: 95.0,
            tp: 110.0,
            leverage: 1.0,
            status: PositionStatus::Closed,
            created_at: closed_at - 1,
            updated_at: closed_at,
            exit: Some(100.0 + pnl),
            closed_at: Some(closed_at),
            realized_pnl: pnl,
        }
    }

    #[test]
    fn empty_book_reports_zeros() {
        let summary = portfolio_summary(&[]);
        assert_eq!(summary.trades, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.expectancy, 0.0);
        assert_eq!(summary.max_drawdown, 0.0);
        assert_eq!(summary.final_equity, 0.0);
    }

    #[test]
    fn known_sequence_produces_known_numbers() {
        let closed: Vec<PaperPosition> = [10.0, -5.0, 5.0, 5.0, -20.0]
            .iter()
            .enumerate()
            .map(|(i, pnl)| closed_position(i as i64 + 1, *pnl))
            .collect();
        let summary = portfolio_summary(&closed);
        assert_eq!(summary.trades, 5);
        assert_eq!(summary.wins, 3);
        assert_eq!(summary.losses, 2);
        assert_eq!(summary.win_rate, 0.6);
        assert_eq!(summary.avg_win, round_to(20.0 / 3.0, 8));
        assert_eq!(summary.avg_loss, -12.5);
        assert_eq!(summary.expectancy, -1.0);
        // Equity: 10, 5, 10, 15, -5. The peak of 15 to -5 is the hole.
        assert_eq!(summary.max_drawdown, 20.0);
        assert_eq!(summary.final_equity, -5.0);
        assert_eq!(summary.max_win_streak, 2);
        assert_eq!(summary.max_loss_streak, 1);
    }

    /// A flat close is still a trade: two wins out of four closes is a
    /// 50% rate, not the 2-of-3 the decided trades alone would give.
    #[test]
    fn zero_pnl_breaks_streaks_but_dilutes_the_rate() {
        let closed: Vec<PaperPosition> = [5.0, 5.0, 0.0, -5.0]
            .iter()
            .enumerate()
            .map(|(i, pnl)| closed_position(i as i64 + 1, *pnl))
            .collect();
        let summary = portfolio_summary(&closed);
        assert_eq!(summary.trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.win_rate, 0.5);
        assert_eq!(summary.expectancy, 1.25);
        assert_eq!(summary.max_win_streak, 2);
        assert_eq!(summary.max_loss_streak, 1);
    }

    #[test]
    fn ordering_follows_close_time_not_insertion() {
        // Inserted newest-first; close order is -5, +5, +5.
        let closed = vec![
            closed_position(3, 5.0),
            closed_position(1, -5.0),
            closed_position(2, 5.0),
        ];
        let summary = portfolio_summary(&closed);
        assert_eq!(summary.max_win_streak, 2);
        assert_eq!(summary.max_loss_streak, 1);
        assert_eq!(summary.max_drawdown, 5.0);
    }
}
