use super::ema;

/// MACD line and signal line, both aligned with the input series.
///
/// `line[i] = EMA(fast)[i] − EMA(slow)[i]`, defined once the slow EMA is
/// warm. `signal` is an EMA of the MACD line, defined `signal_period - 1`
/// bars later.
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    assert!(fast < slow, "MACD fast period must be less than slow period");

    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    // Signal = EMA of the defined portion of the MACD line, re-aligned.
    let defined: Vec<f64> = line.iter().flatten().copied().collect();
    let signal_defined = ema(&defined, signal_period);
    let offset = line.len() - defined.len();
    let mut signal = vec![None; line.len()];
    for (i, v) in signal_defined.into_iter().enumerate() {
        signal[offset + i] = v;
    }

    MacdSeries { line, signal }
}
