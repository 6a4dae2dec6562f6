use std::sync::Arc;

use bytes::Bytes;

use super::{Filter, FilterContext};
use crate::{
    error::Error,
    logger::{LogFacade, LogLevel, Logger},
};

/// Logs every event that crosses it without altering message boundaries.
pub struct LoggingFilter {
    logger: Arc<dyn Logger>,
    level: LogLevel,
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self::new(Arc::new(LogFacade), LogLevel::Debug)
    }
}

impl LoggingFilter {
    pub fn new(logger: Arc<dyn Logger>, level: LogLevel) -> Self {
        Self { logger, level }
    }
}

impl Filter for LoggingFilter {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_inbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
        self.logger.log(
            self.level,
            &format!("{} RECEIVED: {} bytes", ctx.session().id(), message.len()),
        );
        ctx.pass(message);
    }

    fn on_outbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
        self.logger.log(
            self.level,
            &format!("{} SENT: {} bytes", ctx.session().id(), message.len()),
        );
        ctx.pass(message);
    }

    fn on_exception(&mut self, ctx: &mut FilterContext<'_>, error: &Error) {
        self.logger.log(
            LogLevel::Warn,
            &format!("{} EXCEPTION: {}", ctx.session().id(), error),
        );
    }

    fn on_closed(&mut self, ctx: &mut FilterContext<'_>) {
        self.logger
            .log(self.level, &format!("{} CLOSED", ctx.session().id()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attributes::AttributeMap,
        filter::FilterChain,
        logger::tests::RecordingLogger,
        session::{Session, TransportType},
    };

    #[test]
    fn test_logs_and_passes_through() {
        let logger = Arc::new(RecordingLogger::default());
        let shared = logger.clone();
        let mut chain = FilterChain::builder()
            .add_last(move || LoggingFilter::new(shared.clone(), LogLevel::Info))
            .build();
        let session = Session::detached(TransportType::Stream);
        let mut attributes = AttributeMap::default();

        let out = chain.fire_inbound(&session, &mut attributes, Bytes::from_static(b"abc"));
        assert_eq!(out.delivered, vec![Bytes::from_static(b"abc")]);
        let out = chain.fire_outbound(&session, &mut attributes, Bytes::from_static(b"de"));
        assert_eq!(out.transmit, vec![Bytes::from_static(b"de")]);
        chain.fire_exception(&session, &mut attributes, &Error::Disposed);
        chain.fire_closed(&session, &mut attributes);

        let entries = logger.entries.lock().unwrap();
        let id = session.id();
        assert_eq!(
            *entries,
            vec![
                (LogLevel::Info, format!("{id} RECEIVED: 3 bytes")),
                (LogLevel::Info, format!("{id} SENT: 2 bytes")),
                (LogLevel::Warn, format!("{id} EXCEPTION: reactor disposed")),
                (LogLevel::Info, format!("{id} CLOSED")),
            ]
        );
    }
}
