// crates.io
use tracing::{Instrument, Span, instrument::Instrumented};
// self
use crate::{_prelude::*, auth::ConnectionId, obs::OpKind};

/// Span wrapping one gatekeeper operation on one connection.
#[derive(Clone, Debug)]
pub struct OpSpan {
	span: Span,
}
impl OpSpan {
	/// Creates a span tagged with the operation and connection.
	pub fn new(kind: OpKind, connection: &ConnectionId) -> Self {
		let span = tracing::info_span!(
			"oauth2_gatekeeper.op",
			op = kind.as_str(),
			connection = %connection,
		);

		Self { span }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::{ConnectionId, OpKind, OpSpan};

	#[tokio::test]
	async fn instrument_wraps_future() {
		let connection = ConnectionId::new("conn-span").expect("Connection fixture should be valid.");
		let span = OpSpan::new(OpKind::EnsureValid, &connection);
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
