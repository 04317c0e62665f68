//! A token bucket per provider instance. `acquire`/`acquire_n` block until
//! tokens are available; waiters are served in arrival order. Built on
//! monotonic time with fractional-token replenishment, so a 100 rps limiter
//! doesn't round its steady-state rate down to whole-second ticks.
//!
//! Callers hold no timeout here; a deadline, if one is wanted, belongs to
//! the caller (`tokio::time::timeout` around `acquire`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::trace;

struct State {
	tokens: f64,
	last_refill: Instant,
}

impl State {
	fn refill(&mut self, rate: f64, burst: f64, now: Instant) {
		let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * rate).min(burst);
		self.last_refill = now;
	}
}

pub struct RateLimiter {
	rate: f64,
	burst: f64,
	state: Mutex<State>,
	queue: Mutex<VecDeque<Arc<Notify>>>,
}

impl RateLimiter {
	/// `rate` in tokens/second (steady state), `burst` as bucket capacity.
	/// The bucket starts full.
	pub fn new(rate: f64, burst: f64) -> Self {
		assert!(rate > 0.0 && burst > 0.0, "rate and burst must be positive");
		Self {
			rate,
			burst,
			state: Mutex::new(State {
				tokens: burst,
				last_refill: Instant::now(),
			}),
			queue: Mutex::new(VecDeque::new()),
		}
	}

	/// No limiter at all: every `acquire` returns immediately. Used by
	/// providers that have no external rate contract to respect (the
	/// offline geo/ASN database reader).
	pub fn unlimited() -> Self {
		Self::new(f64::INFINITY, f64::INFINITY)
	}

	pub fn whois_default() -> Self {
		Self::new(100.0, 100.0)
	}

	pub fn scanner_reputation_default() -> Self {
		Self::new(10.0, 10.0)
	}

	pub async fn acquire(&self) {
		self.acquire_n(1.0).await
	}

	/// Block until `n` tokens are available, consuming them atomically.
	/// Concurrent callers are served FIFO.
	pub async fn acquire_n(&self, n: f64) {
		if !self.rate.is_finite() {
			return;
		}
		let ticket = Arc::new(Notify::new());
		{
			let mut queue = self.queue.lock().await;
			queue.push_back(ticket.clone());
		}
		loop {
			if !self.is_at_front(&ticket).await {
				ticket.notified().await;
				continue;
			}
			let wait = {
				let mut state = self.state.lock().await;
				state.refill(self.rate, self.burst, Instant::now());
				if state.tokens >= n {
					state.tokens -= n;
					None
				} else {
					Some(Duration::from_secs_f64((n - state.tokens) / self.rate))
				}
			};
			match wait {
				None => {
					self.advance_queue().await;
					return;
				}
				Some(delay) => {
					trace!(?delay, tokens_needed = n, "rate limiter waiting for tokens");
					tokio::time::sleep(delay).await;
				}
			}
		}
	}

	async fn is_at_front(&self, ticket: &Arc<Notify>) -> bool {
		let queue = self.queue.lock().await;
		matches!(queue.front(), Some(front) if Arc::ptr_eq(front, ticket))
	}

	async fn advance_queue(&self) {
		let mut queue = self.queue.lock().await;
		queue.pop_front();
		if let Some(next) = queue.front() {
			next.notify_one();
		}
	}
}
