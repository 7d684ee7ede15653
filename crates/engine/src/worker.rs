use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use common::{
    ContractType, Error, ExchangeClient, Position, ProtectiveKind, Result, Side, Signal,
};
use strategy::{evaluate, AssetConfig, MarketSnapshot, StrategyMode};

use crate::retry::{call_with_retry, RetryPolicy};

/// Lifecycle states of one asset's trading loop.
///
/// `Failed` is absorbing: only auth errors, unsupported instruments, or
/// invariant violations reach it, and it terminates this worker only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Idle,
    Fetching,
    Evaluating,
    Entering,
    InPosition,
    Exiting,
    Failed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Connecting => "connecting",
            WorkerState::Idle => "idle",
            WorkerState::Fetching => "fetching",
            WorkerState::Evaluating => "evaluating",
            WorkerState::Entering => "entering",
            WorkerState::InPosition => "in-position",
            WorkerState::Exiting => "exiting",
            WorkerState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// What one tick accomplished; every variant maps to one log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Data unavailable or a dropped entry — nothing changed this tick.
    Skipped,
    /// Fresh data evaluated, no entry conditions met.
    NoSignal,
    /// A position was opened and protected.
    Entered,
    /// An open position was checked and kept.
    Held,
    /// An open position was flattened.
    Exited,
}

/// One asset's trading loop: fetch → evaluate → enter/hold/exit, forever.
///
/// Owns the only mutable state for its asset — the `Position` — which is
/// replaced wholesale on every transition, never field-patched. All remote
/// reads go through the retry wrapper; order placement is single-shot (a
/// failed entry drops the signal rather than re-firing it).
pub struct Worker {
    cfg: Arc<AssetConfig>,
    client: Arc<dyn ExchangeClient>,
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    state: WorkerState,
    position: Option<Position>,
}

impl Worker {
    pub fn new(
        cfg: Arc<AssetConfig>,
        client: Arc<dyn ExchangeClient>,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            client,
            policy,
            shutdown,
            state: WorkerState::Connecting,
            position: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Verify the instrument before trading it. Anything other than a
    /// linear perpetual is a configuration mistake, not a market hiccup,
    /// so it is fatal for this worker.
    pub async fn connect(&mut self) -> Result<()> {
        self.set_state(WorkerState::Connecting);

        let client = Arc::clone(&self.client);
        let symbol = self.cfg.symbol.clone();
        let info = call_with_retry(&self.policy, &mut self.shutdown, move || {
            let client = Arc::clone(&client);
            let symbol = symbol.clone();
            async move { client.instrument_info(&symbol).await }
        })
        .await
        .map_err(|e| match e {
            // Could not verify the instrument at startup — refuse to trade it
            Error::DataUnavailable => {
                Error::Fatal(format!("could not verify instrument {}", self.cfg.symbol))
            }
            other => other,
        })?;

        if info.contract_type != ContractType::LinearPerpetual {
            return Err(Error::Fatal(format!(
                "{} is not a linear perpetual contract",
                self.cfg.symbol
            )));
        }

        info!(symbol = %self.cfg.symbol, "instrument verified");
        self.set_state(WorkerState::Idle);
        Ok(())
    }

    /// One full pass of the state machine. Transient trouble degrades to
    /// `Skipped`; only `Error::Fatal` and `Error::Shutdown` escape.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.set_state(WorkerState::Fetching);

        let short_tf = self.cfg.short_timeframe.clone();
        let short = match self.fetch_snapshot(&short_tf).await {
            Ok(snapshot) => snapshot,
            Err(Error::DataUnavailable) => return self.skip_tick("short timeframe unavailable"),
            Err(e) => return Err(e),
        };

        // The long-timeframe trend filter is only consulted for entries.
        let long = if self.cfg.mode == StrategyMode::Structural && self.position.is_none() {
            let long_tf = self.cfg.long_timeframe.clone();
            match self.fetch_snapshot(&long_tf).await {
                Ok(snapshot) => Some(snapshot),
                Err(Error::DataUnavailable) => {
                    return self.skip_tick("long timeframe unavailable")
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        self.set_state(WorkerState::Evaluating);
        match self.position.clone() {
            None => match evaluate(&short, long.as_ref(), &self.cfg) {
                Some(signal) => self.enter(signal).await,
                None => {
                    debug!(symbol = %self.cfg.symbol, "no signal");
                    self.set_state(WorkerState::Idle);
                    Ok(TickOutcome::NoSignal)
                }
            },
            Some(position) => {
                if exit_level_crossed(&short, &position) {
                    self.exit(position).await
                } else {
                    debug!(
                        symbol = %self.cfg.symbol,
                        entry = position.entry_price,
                        invalidation = position.invalidation_level,
                        target = position.target_level,
                        "position held"
                    );
                    self.set_state(WorkerState::InPosition);
                    Ok(TickOutcome::Held)
                }
            }
        }
    }

    /// Drive the loop until shutdown or a fatal error.
    pub async fn run(mut self) {
        if let Err(e) = self.connect().await {
            match e {
                Error::Shutdown => return,
                e => {
                    self.fail(e);
                    return;
                }
            }
        }

        loop {
            if *self.shutdown.borrow() {
                info!(symbol = %self.cfg.symbol, "shutdown — worker stopping");
                return;
            }

            match self.tick().await {
                Ok(outcome) => {
                    info!(symbol = %self.cfg.symbol, ?outcome, "tick complete");
                }
                Err(Error::Shutdown) => {
                    info!(symbol = %self.cfg.symbol, "shutdown — worker stopping");
                    return;
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }

            let interval = Duration::from_secs(self.cfg.poll_interval_secs);
            tokio::select! {
                _ = sleep(interval) => {}
                _ = self.shutdown.changed() => {
                    info!(symbol = %self.cfg.symbol, "shutdown — worker stopping");
                    return;
                }
            }
        }
    }

    async fn fetch_snapshot(&mut self, timeframe: &str) -> Result<MarketSnapshot> {
        let client = Arc::clone(&self.client);
        let symbol = self.cfg.symbol.clone();
        let timeframe = timeframe.to_string();
        let limit = self.cfg.lookback;

        let candles = call_with_retry(&self.policy, &mut self.shutdown, move || {
            let client = Arc::clone(&client);
            let symbol = symbol.clone();
            let timeframe = timeframe.clone();
            async move { client.fetch_candles(&symbol, &timeframe, limit).await }
        })
        .await?;

        Ok(MarketSnapshot::from_candles(candles, &self.cfg.strategy))
    }

    /// Open and protect a position. A failed market order drops the signal.
    /// A fill that cannot be protected is flattened immediately — this
    /// worker never carries a position without a resting stop.
    async fn enter(&mut self, signal: Signal) -> Result<TickOutcome> {
        self.set_state(WorkerState::Entering);

        let symbol = self.cfg.symbol.clone();
        let quantity = self.cfg.risk.trade_amount_usd / signal.reference_price;
        let stop_price = signal.invalidation_price;
        let target_price = target_price(&signal, &self.cfg);

        info!(
            symbol = %symbol,
            direction = %signal.direction,
            reference = signal.reference_price,
            notional = self.cfg.risk.trade_amount_usd,
            qty = quantity,
            stop = stop_price,
            target = target_price,
            "entry signal"
        );

        let fill = match self
            .client
            .place_market_order(&symbol, signal.direction, quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "entry order failed — dropping signal");
                self.set_state(WorkerState::Idle);
                return Ok(TickOutcome::Skipped);
            }
        };

        let mut protective_order_ids = Vec::with_capacity(2);
        for (trigger, kind) in [
            (stop_price, ProtectiveKind::Stop),
            (target_price, ProtectiveKind::Target),
        ] {
            match self
                .client
                .place_protective_order(&symbol, signal.direction, quantity, trigger, kind)
                .await
            {
                Ok(order_id) => {
                    debug!(symbol = %symbol, %kind, trigger, order_id, "protective order placed");
                    protective_order_ids.push(order_id);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(symbol = %symbol, %kind, error = %e, "failed to protect position — flattening");
                    return self.flatten_unprotected(signal.direction, quantity).await;
                }
            }
        }

        let entry_price = fill.fill_price;
        self.position = Some(Position {
            side: signal.direction,
            entry_price,
            quantity,
            invalidation_level: signal.invalidation_price,
            target_level: target_price,
            order_id: Some(fill.order_id),
            protective_order_ids,
        });

        info!(
            symbol = %symbol,
            direction = %signal.direction,
            entry = entry_price,
            "entered position"
        );
        self.set_state(WorkerState::InPosition);
        Ok(TickOutcome::Entered)
    }

    /// Undo a fill whose protective orders could not be placed. Reduce-only
    /// so it can at worst leave the account flat.
    async fn flatten_unprotected(&mut self, side: Side, quantity: f64) -> Result<TickOutcome> {
        match self
            .client
            .close_position(&self.cfg.symbol, side, quantity)
            .await
        {
            Ok(_) => {
                warn!(symbol = %self.cfg.symbol, "unprotected position flattened");
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                // Position may still be open at the venue. This is exactly
                // the order-state corruption the taxonomy calls fatal.
                error!(symbol = %self.cfg.symbol, error = %e, "failed to flatten unprotected position");
                return Err(Error::Fatal(format!(
                    "unprotected position on {} could not be flattened: {e}",
                    self.cfg.symbol
                )));
            }
        }

        self.position = None;
        self.set_state(WorkerState::Idle);
        Ok(TickOutcome::Skipped)
    }

    /// Flatten a position whose invalidation or target level was crossed.
    ///
    /// The close is reduce-only, so if a resting protective order already
    /// filled at the venue this reconciles the bookkeeping instead of
    /// opening a fresh position. Either way the leftover protective orders
    /// are cancelled so they cannot ambush a later entry.
    async fn exit(&mut self, position: Position) -> Result<TickOutcome> {
        self.set_state(WorkerState::Exiting);

        match self
            .client
            .close_position(&self.cfg.symbol, position.side, position.quantity)
            .await
        {
            Ok(Some(fill)) => {
                info!(
                    symbol = %self.cfg.symbol,
                    direction = %position.side,
                    entry = position.entry_price,
                    exit = fill.fill_price,
                    "exited position"
                );
            }
            Ok(None) => {
                info!(
                    symbol = %self.cfg.symbol,
                    direction = %position.side,
                    entry = position.entry_price,
                    "position already closed at the venue — protective order filled"
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                // Keep the position and try again next tick; the resting
                // protective orders still cover it meanwhile.
                warn!(symbol = %self.cfg.symbol, error = %e, "exit order failed — retrying next tick");
                self.set_state(WorkerState::InPosition);
                return Ok(TickOutcome::Held);
            }
        }

        for order_id in &position.protective_order_ids {
            match self.client.cancel_order(&self.cfg.symbol, order_id).await {
                Ok(()) => {
                    debug!(symbol = %self.cfg.symbol, order_id, "protective order cancelled");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // Reduce-only, so harmless while flat, but it would
                    // close a future position at this stale trigger.
                    warn!(
                        symbol = %self.cfg.symbol,
                        order_id,
                        error = %e,
                        "failed to cancel protective order — stale trigger left resting"
                    );
                }
            }
        }

        self.position = None;
        self.set_state(WorkerState::Idle);
        Ok(TickOutcome::Exited)
    }

    fn skip_tick(&mut self, reason: &str) -> Result<TickOutcome> {
        warn!(symbol = %self.cfg.symbol, reason, "tick skipped");
        self.set_state(WorkerState::Idle);
        Ok(TickOutcome::Skipped)
    }

    fn fail(&mut self, error: Error) {
        error!(symbol = %self.cfg.symbol, error = %error, "worker failed permanently");
        self.set_state(WorkerState::Failed);
    }

    fn set_state(&mut self, next: WorkerState) {
        if self.state != next {
            debug!(symbol = %self.cfg.symbol, from = %self.state, to = %next, "state transition");
            self.state = next;
        }
    }
}

/// Exit test: has the decision candle closed at or beyond the invalidation
/// level or the profit target? Uses the second-to-last candle like every
/// other decision. A close beyond either level also means the matching
/// protective order has likely fired at the venue.
fn exit_level_crossed(snapshot: &MarketSnapshot, position: &Position) -> bool {
    let Some(i) = snapshot.decision_index() else {
        return false;
    };
    let close = snapshot.candles[i].close;
    match position.side {
        Side::Long => close <= position.invalidation_level || close >= position.target_level,
        Side::Short => close >= position.invalidation_level || close <= position.target_level,
    }
}

/// Target sits `tp_atr_mult / sl_atr_mult` risk-distances beyond the
/// reference price, i.e. `tp_atr_mult × ATR` away.
fn target_price(signal: &Signal, cfg: &AssetConfig) -> f64 {
    let risk_distance = (signal.reference_price - signal.invalidation_price).abs();
    let offset = risk_distance * cfg.strategy.tp_atr_mult / cfg.strategy.sl_atr_mult;
    match signal.direction {
        Side::Long => signal.reference_price + offset,
        Side::Short => signal.reference_price - offset,
    }
}
