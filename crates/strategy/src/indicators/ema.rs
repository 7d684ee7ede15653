/// Exponential Moving Average, seeded with the SMA of the first `period`
/// values (TradingView convention).
///
/// Output is aligned with the input: `out[i]` is the EMA as of `values[i]`,
/// `None` for `i < period - 1`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    assert!(period >= 1, "EMA period must be >= 1");
    let mut out = vec![None; values.len()];
    if values.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema_val = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(ema_val);

    for i in period..values.len() {
        ema_val = values[i] * k + ema_val * (1.0 - k);
        out[i] = Some(ema_val);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_warms_up_then_fills() {
        let values: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let out = ema(&values, 5);
        assert_eq!(out.len(), 10);
        assert!(out[..4].iter().all(Option::is_none));
        assert!(out[4..].iter().all(Option::is_some));
    }

    #[test]
    fn ema_seed_is_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ema(&values, 5);
        assert!((out[4].unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ema_tracks_constant_series() {
        let values = vec![42.0; 20];
        let out = ema(&values, 7);
        assert!((out.last().unwrap().unwrap() - 42.0).abs() < 1e-9);
    }

    #[test]
    fn ema_rises_on_uptrend() {
        let values: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = ema(&values, 10);
        let tail: Vec<f64> = out.iter().flatten().copied().collect();
        assert!(tail.windows(2).all(|w| w[1] > w[0]));
    }
}
