//! # Dual-Endpoint Rate Limiter
//!
//! Every account lookup goes through one shared [`RateLimiter`]. It keeps a
//! sliding window of attempt timestamps for each of the two player endpoints
//! and decides which endpoint the next request should use, or how long the
//! caller must wait.
//!
//! ## Modes
//!
//! - **Single**: only one endpoint answered the startup probe (or none did;
//!   the primary is used then). Callers pace at 2 s.
//! - **Dual**: both answered. Requests alternate by last use and spill over
//!   to the other endpoint when the preferred one is full. Callers pace at 1 s.
//!
//! ## Invariant
//!
//! A slot is consumed at the moment of the attempt, whatever the outcome.
//! Recording is checked under the same lock as the capacity test, so no
//! window ever holds more than `capacity` entries.

use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::api::client::{Endpoint, GameApi};
use crate::common::config::RateLimitConfig;
use crate::common::messages::AccountId;

/// Decision returned by [`RateLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Endpoint(Endpoint),
    Wait(Duration),
}

/// Current operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimiterMode {
    Single(Endpoint),
    Dual,
}

/// Budget of one endpoint at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointUsage {
    pub used: usize,
    pub remaining: usize,
    pub reachable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateUsage {
    pub primary: EndpointUsage,
    pub secondary: EndpointUsage,
}

#[derive(Debug, Default)]
struct Window {
    stamps: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant, span: Duration) {
        while let Some(oldest) = self.stamps.front() {
            if now.duration_since(*oldest) >= span {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_room(&self, capacity: usize) -> bool {
        self.stamps.len() < capacity
    }

    /// Time until the oldest entry leaves the window.
    fn wait(&self, now: Instant, span: Duration) -> Duration {
        self.stamps
            .front()
            .map(|oldest| (*oldest + span).saturating_duration_since(now))
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct LimiterState {
    primary: Window,
    secondary: Window,
    primary_reachable: bool,
    secondary_reachable: bool,
    last_used: Option<Endpoint>,
}

impl LimiterState {
    fn window(&self, endpoint: Endpoint) -> &Window {
        match endpoint {
            Endpoint::Primary => &self.primary,
            Endpoint::Secondary => &self.secondary,
        }
    }

    fn window_mut(&mut self, endpoint: Endpoint) -> &mut Window {
        match endpoint {
            Endpoint::Primary => &mut self.primary,
            Endpoint::Secondary => &mut self.secondary,
        }
    }

    fn mode(&self) -> LimiterMode {
        match (self.primary_reachable, self.secondary_reachable) {
            (true, true) => LimiterMode::Dual,
            (false, true) => LimiterMode::Single(Endpoint::Secondary),
            _ => LimiterMode::Single(Endpoint::Primary),
        }
    }
}

/// Shared request budget for the two player endpoints.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    capacity: usize,
    span: Duration,
    single_pacing: Duration,
    dual_pacing: Duration,
}

impl RateLimiter {
    /// A limiter in single-endpoint mode on the primary until
    /// [`probe_endpoints`](Self::probe_endpoints) or
    /// [`set_availability`](Self::set_availability) says otherwise.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                primary: Window::default(),
                secondary: Window::default(),
                primary_reachable: true,
                secondary_reachable: false,
                last_used: None,
            }),
            capacity: config.capacity,
            span: config.window(),
            single_pacing: Duration::from_secs_f64(config.single_endpoint_pacing_secs),
            dual_pacing: Duration::from_secs_f64(config.dual_endpoint_pacing_secs),
        }
    }

    fn select(&self, state: &mut LimiterState, now: Instant) -> Acquisition {
        state.primary.prune(now, self.span);
        state.secondary.prune(now, self.span);

        match state.mode() {
            LimiterMode::Single(endpoint) => {
                let window = state.window(endpoint);
                if window.has_room(self.capacity) {
                    Acquisition::Endpoint(endpoint)
                } else {
                    Acquisition::Wait(window.wait(now, self.span))
                }
            }
            LimiterMode::Dual => {
                let preferred = state
                    .last_used
                    .map(Endpoint::other)
                    .unwrap_or(Endpoint::Primary);

                if state.window(preferred).has_room(self.capacity) {
                    Acquisition::Endpoint(preferred)
                } else if state.window(preferred.other()).has_room(self.capacity) {
                    Acquisition::Endpoint(preferred.other())
                } else {
                    let wait = state
                        .primary
                        .wait(now, self.span)
                        .min(state.secondary.wait(now, self.span));
                    Acquisition::Wait(wait)
                }
            }
        }
    }

    /// Pick the endpoint for the next request, or report how long to wait.
    ///
    /// Does not consume a slot; pair with [`try_record`](Self::try_record).
    pub async fn acquire(&self) -> Acquisition {
        let mut state = self.state.lock().await;
        self.select(&mut state, Instant::now())
    }

    /// Consume one slot on `endpoint` if its window has room.
    ///
    /// # Returns
    /// - `true`: the attempt is recorded
    /// - `false`: the window is full, nothing recorded
    pub async fn try_record(&self, endpoint: Endpoint) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let span = self.span;
        let capacity = self.capacity;

        let window = state.window_mut(endpoint);
        window.prune(now, span);
        if !window.has_room(capacity) {
            return false;
        }
        window.stamps.push_back(now);
        state.last_used = Some(endpoint);
        true
    }

    /// Wait until a slot is free, consume it and return its endpoint.
    pub async fn reserve(&self) -> Endpoint {
        loop {
            let decision = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                match self.select(&mut state, now) {
                    Acquisition::Endpoint(endpoint) => {
                        state.window_mut(endpoint).stamps.push_back(now);
                        state.last_used = Some(endpoint);
                        Acquisition::Endpoint(endpoint)
                    }
                    wait => wait,
                }
            };

            match decision {
                Acquisition::Endpoint(endpoint) => return endpoint,
                Acquisition::Wait(wait) => {
                    info!("⏳ Lookup budget exhausted, waiting {:.1}s", wait.as_secs_f64());
                    tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
                }
            }
        }
    }

    /// Like [`reserve`](Self::reserve), but pinned to one endpoint whatever the mode.
    async fn reserve_on(&self, endpoint: Endpoint) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut state = self.state.lock().await;
                let window = state.window_mut(endpoint);
                window.prune(now, self.span);
                if window.has_room(self.capacity) {
                    window.stamps.push_back(now);
                    state.last_used = Some(endpoint);
                    return;
                }
                window.wait(now, self.span)
            };

            info!(
                "⏳ {} lookup budget exhausted, waiting {:.1}s to probe",
                endpoint,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    pub async fn set_availability(&self, primary: bool, secondary: bool) {
        let mut state = self.state.lock().await;
        state.primary_reachable = primary;
        state.secondary_reachable = secondary;
    }

    /// Probe both endpoints once and switch mode accordingly.
    ///
    /// Each probe is an attempted request and consumes a slot.
    pub async fn probe_endpoints(&self, api: &dyn GameApi, account: AccountId) -> LimiterMode {
        let mut reachable = [false; 2];
        for (slot, endpoint) in [Endpoint::Primary, Endpoint::Secondary].into_iter().enumerate() {
            self.reserve_on(endpoint).await;
            reachable[slot] = api.probe(endpoint, account).await;
        }

        self.set_availability(reachable[0], reachable[1]).await;
        let mode = self.mode().await;
        match mode {
            LimiterMode::Dual => info!("✅ Both lookup endpoints reachable, dual mode"),
            LimiterMode::Single(endpoint) if reachable.iter().any(|r| *r) => {
                info!("📡 Only the {} lookup endpoint is reachable", endpoint)
            }
            LimiterMode::Single(_) => {
                warn!("⚠️  No lookup endpoint answered the probe, defaulting to primary")
            }
        }
        mode
    }

    pub async fn mode(&self) -> LimiterMode {
        self.state.lock().await.mode()
    }

    /// Delay callers should leave between consecutive lookups.
    pub async fn pacing(&self) -> Duration {
        match self.mode().await {
            LimiterMode::Single(_) => self.single_pacing,
            LimiterMode::Dual => self.dual_pacing,
        }
    }

    pub async fn usage(&self) -> RateUsage {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.primary.prune(now, self.span);
        state.secondary.prune(now, self.span);

        let usage = |window: &Window, reachable: bool| EndpointUsage {
            used: window.stamps.len(),
            remaining: self.capacity.saturating_sub(window.stamps.len()),
            reachable,
        };

        RateUsage {
            primary: usage(&state.primary, state.primary_reachable),
            secondary: usage(&state.secondary, state.secondary_reachable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::{Challenge, Session, SubmitReply};
    use crate::common::error::ApiError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_full_waits_for_earliest_expiry() {
        let limiter = limiter();
        limiter.set_availability(true, true).await;

        for _ in 0..30 {
            assert!(limiter.try_record(Endpoint::Primary).await);
        }
        tokio::time::advance(Duration::from_secs(28)).await;
        for _ in 0..30 {
            assert!(limiter.try_record(Endpoint::Secondary).await);
        }
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(limiter.acquire().await, Acquisition::Wait(Duration::from_secs(12)));
        assert!(!limiter.try_record(Endpoint::Primary).await);
        assert!(!limiter.try_record(Endpoint::Secondary).await);

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(limiter.acquire().await, Acquisition::Endpoint(Endpoint::Primary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_mode_alternates_and_spills_over() {
        let limiter = limiter();
        limiter.set_availability(true, true).await;

        let first = limiter.reserve().await;
        let second = limiter.reserve().await;
        assert_eq!(first, Endpoint::Primary);
        assert_eq!(second, Endpoint::Secondary);

        for _ in 0..29 {
            assert!(limiter.try_record(Endpoint::Secondary).await);
        }
        // secondary is full, the preferred primary still has room
        assert_eq!(limiter.acquire().await, Acquisition::Endpoint(Endpoint::Primary));

        for _ in 0..29 {
            assert!(limiter.try_record(Endpoint::Primary).await);
        }
        assert!(matches!(limiter.acquire().await, Acquisition::Wait(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_mode_uses_reachable_endpoint() {
        let limiter = limiter();
        limiter.set_availability(false, true).await;
        assert_eq!(limiter.mode().await, LimiterMode::Single(Endpoint::Secondary));
        assert_eq!(limiter.pacing().await, Duration::from_secs(2));

        for _ in 0..30 {
            assert_eq!(limiter.reserve().await, Endpoint::Secondary);
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(limiter.acquire().await, Acquisition::Wait(Duration::from_secs(55)));

        limiter.set_availability(false, false).await;
        assert_eq!(limiter.mode().await, LimiterMode::Single(Endpoint::Primary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_sleeps_until_slot_frees() {
        let limiter = limiter();
        for _ in 0..30 {
            limiter.reserve().await;
        }

        let started = Instant::now();
        assert_eq!(limiter.reserve().await, Endpoint::Primary);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    struct Reachable(AtomicUsize);

    #[async_trait]
    impl GameApi for Reachable {
        async fn login(&self, _: Endpoint, _: AccountId) -> Result<Session, ApiError> {
            Err(ApiError::RateLimited)
        }

        async fn fetch_challenge(&self, _: &Session) -> Result<Challenge, ApiError> {
            Err(ApiError::RateLimited)
        }

        async fn submit_code(&self, _: &Session, _: &str, _: &str) -> Result<SubmitReply, ApiError> {
            Err(ApiError::RateLimited)
        }

        async fn probe(&self, _: Endpoint, _: AccountId) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_probe_waits_for_a_full_window() {
        let limiter = limiter();
        for _ in 0..30 {
            assert!(limiter.try_record(Endpoint::Primary).await);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let api = Reachable(AtomicUsize::new(0));
        let started = Instant::now();
        let mode = limiter.probe_endpoints(&api, 46765089).await;

        assert_eq!(mode, LimiterMode::Dual);
        assert_eq!(api.0.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(50));

        let usage = limiter.usage().await;
        assert_eq!(usage.primary.used, 1);
        assert_eq!(usage.secondary.used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_capacity() {
        let limiter = Arc::new(limiter());
        limiter.set_availability(true, true).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut recorded = 0;
                for _ in 0..20 {
                    if let Acquisition::Endpoint(endpoint) = limiter.acquire().await {
                        if limiter.try_record(endpoint).await {
                            recorded += 1;
                        }
                    }
                }
                recorded
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 60);

        let usage = limiter.usage().await;
        assert_eq!(usage.primary.used, 30);
        assert_eq!(usage.secondary.used, 30);
        assert_eq!(usage.primary.remaining, 0);
    }
}
