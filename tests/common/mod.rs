#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	sync::atomic::{AtomicUsize, Ordering},
};
// self
use oauth2_gatekeeper::{
	_preludet::*,
	auth::{TokenSecret, TokenSet},
	endpoint::{CodeExchange, TokenEndpoint, TokenFuture},
	error::TransientError,
};

/// Scripted [`TokenEndpoint`] recording every refresh token it is asked to redeem.
///
/// Queued outcomes are served first; once the queue is empty each call mints a fresh token set
/// that lives for an hour.
#[derive(Default)]
pub struct ScriptedEndpoint {
	script: Mutex<VecDeque<Result<TokenSet>>>,
	redeemed: Mutex<Vec<String>>,
	exchanged: Mutex<Vec<String>>,
	minted: Mutex<u32>,
	latency: StdDuration,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}
impl ScriptedEndpoint {
	pub fn new() -> Self {
		Self::default()
	}

	/// Delays every response by `latency` on the Tokio clock.
	pub fn with_latency(mut self, latency: StdDuration) -> Self {
		self.latency = latency;

		self
	}

	pub fn push(&self, outcome: Result<TokenSet>) -> &Self {
		self.script.lock().push_back(outcome);

		self
	}

	pub fn push_transient(&self, message: &str) -> &Self {
		self.push(Err(TransientError::TokenEndpoint {
			message: message.into(),
			status: Some(503),
			retry_after: None,
		}
		.into()))
	}

	pub fn push_invalid_grant(&self) -> &Self {
		self.push(Err(Error::InvalidGrant { reason: "refresh token already used".into() }))
	}

	/// Refresh tokens redeemed so far, in call order.
	pub fn redeemed(&self) -> Vec<String> {
		self.redeemed.lock().clone()
	}

	pub fn refresh_calls(&self) -> usize {
		self.redeemed.lock().len()
	}

	pub fn exchanged_codes(&self) -> Vec<String> {
		self.exchanged.lock().clone()
	}

	/// Highest number of refresh calls that were awaiting a response at the same time.
	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	async fn respond(&self) -> Result<TokenSet> {
		if !self.latency.is_zero() {
			tokio::time::sleep(self.latency).await;
		}

		let scripted = self.script.lock().pop_front();

		scripted.unwrap_or_else(|| {
			let mut minted = self.minted.lock();

			*minted += 1;

			Ok(TokenSet::new(
				format!("access-{minted}"),
				format!("refresh-{minted}"),
				Duration::hours(1),
			))
		})
	}
}
impl TokenEndpoint for ScriptedEndpoint {
	fn exchange_code<'a>(&'a self, exchange: &'a CodeExchange) -> TokenFuture<'a> {
		self.exchanged.lock().push(exchange.code.clone());

		Box::pin(self.respond())
	}

	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> TokenFuture<'a> {
		self.redeemed.lock().push(refresh_token.expose().to_owned());

		Box::pin(async move {
			let _in_flight = InFlight::enter(self);

			self.respond().await
		})
	}
}

// Decrements on drop so abandoned calls stop counting too.
struct InFlight<'a>(&'a AtomicUsize);
impl<'a> InFlight<'a> {
	fn enter(endpoint: &'a ScriptedEndpoint) -> Self {
		let now = endpoint.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

		endpoint.max_in_flight.fetch_max(now, Ordering::SeqCst);

		Self(&endpoint.in_flight)
	}
}
impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}
