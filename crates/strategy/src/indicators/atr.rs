use common::Candle;

/// ATR (Average True Range) with Wilder smoothing.
///
/// True range of candle `i` uses the previous close, so `out[i]` is `None`
/// for `i < period` — the first value needs `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    assert!(period >= 1, "ATR period must be >= 1");
    let mut out = vec![None; candles.len()];
    if candles.len() < period + 1 {
        return out;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let mut atr_val = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period] = Some(atr_val);

    for (i, &tr) in true_ranges.iter().enumerate().skip(period) {
        atr_val = (atr_val * (period - 1) as f64 + tr) / period as f64;
        out[i + 1] = Some(atr_val);
    }
    out
}

fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(i: usize, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt(i as i64 * 60, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn atr_warms_up_for_period_plus_one_candles() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(i, 11.0, 9.0, 10.0)).collect();
        let out = atr(&candles, 5);
        assert!(out.iter().all(Option::is_none));

        let candles: Vec<Candle> = (0..6).map(|i| candle(i, 11.0, 9.0, 10.0)).collect();
        let out = atr(&candles, 5);
        assert!(out[..5].iter().all(Option::is_none));
        assert!(out[5].is_some());
    }

    #[test]
    fn atr_of_constant_range_equals_range() {
        // high-low = 2.0 every bar, close never gaps → TR = 2.0 everywhere
        let candles: Vec<Candle> = (0..20).map(|i| candle(i, 11.0, 9.0, 10.0)).collect();
        let out = atr(&candles, 14);
        let value = out.last().unwrap().unwrap();
        assert!((value - 2.0).abs() < 1e-9, "Expected 2.0, got {value}");
    }

    #[test]
    fn atr_accounts_for_gaps() {
        // A gap from close 10 to low 20 must widen the true range
        let mut candles: Vec<Candle> = (0..14).map(|i| candle(i, 11.0, 9.0, 10.0)).collect();
        candles.push(candle(14, 22.0, 20.0, 21.0));
        let out = atr(&candles, 14);
        let value = out.last().unwrap().unwrap();
        assert!(value > 2.0, "Gap should raise ATR above 2.0, got {value}");
    }
}
