//! Backtest report rendering

use std::path::Path;

use anyhow::Context;

use crate::backtest::BacktestReport;

/// Plain-text summary for the terminal
pub fn render(report: &BacktestReport) -> String {
    let mut out = String::new();
    out.push_str("==================== BACKTEST REPORT ====================\n");
    out.push_str(&format!("Symbols:            {}\n", report.symbols.join(", ")));
    out.push_str(&format!("Steps:              {}\n", report.steps));
    out.push_str(&format!("Signals emitted:    {}\n", report.signals));
    out.push_str(&format!("No-decisions:       {}\n", report.no_decisions));
    out.push_str(&format!("Trades closed:      {}\n", report.trades.len()));
    out.push_str(&format!(
        "Win rate:           {:.1}% ({} wins / {} losses)\n",
        report.win_rate * 100.0,
        report.wins,
        report.losses
    ));
    out.push_str(&format!("Total PnL:          {}\n", report.total_pnl));
    out.push_str(&format!("Starting capital:   {}\n", report.starting_capital));
    out.push_str(&format!("Ending equity:      {}\n", report.ending_equity));
    out.push_str(&format!(
        "Max drawdown:       {:.2}%\n",
        report.max_drawdown_pct
    ));
    out.push_str(&format!(
        "Avg stop efficiency: {:.2}\n",
        report.avg_stop_efficiency
    ));

    if !report.trades.is_empty() {
        out.push_str("\nTrades:\n");
        for trade in &report.trades {
            out.push_str(&format!(
                "  {} {} {} -> {} | PnL {} | {} periods | {}\n",
                trade.side,
                trade.symbol,
                trade.entry_price,
                trade.exit_price,
                trade.pnl,
                trade.periods_held,
                trade.exit_reason
            ));
        }
    }
    out.push_str("=========================================================\n");
    out
}

/// JSON artifact alongside the terminal summary
pub fn write_json(report: &BacktestReport, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating report dir {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    Ok(())
}
