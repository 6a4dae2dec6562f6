//! The filter chain: a session's protocol pipeline.
//!
//! A [`FilterChain`] is a fixed-order list of [`Filter`]s built once per session
//! from a [`FilterChainBuilder`]. Bytes read from the transport enter at the head
//! and travel towards the tail; messages written by the application enter at the
//! tail and travel towards the head, so encoders and decoders mirror each other.
//!
//! ```text
//!            inbound (head → tail)
//!  socket ──▶ [0] logging ──▶ [1] codec ──▶ [2] ... ──▶ handler / read queue
//!  socket ◀── [0] logging ◀── [1] codec ◀── [2] ... ◀── session.write()
//!            outbound (tail → head)
//! ```
//!
//! A filter hands messages on through its [`FilterContext`]:
//!
//! - [`FilterContext::pass`] continues in the direction of the current event
//! - [`FilterContext::write`] starts an outbound message at this filter, so it
//!   only crosses the filters between this one and the head
//! - [`FilterContext::fail`] reports a protocol failure; nothing further is
//!   processed for that event and the reactor closes the session (inbound) or
//!   fails the write (outbound)
//!
//! Filters are invoked with whatever the transport delivered: an empty buffer,
//! part of a message, one message or several. State that must survive between
//! invocations belongs in the session's attributes, reachable through
//! [`FilterContext::attributes_mut`].
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use mill_nio::filter::{Filter, FilterChain, FilterContext};
//!
//! /// Upper-cases inbound ASCII, leaves outbound traffic alone.
//! struct Shout;
//!
//! impl Filter for Shout {
//!     fn name(&self) -> &str {
//!         "shout"
//!     }
//!
//!     fn on_inbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
//!         ctx.pass(Bytes::from(message.to_ascii_uppercase()));
//!     }
//! }
//!
//! let chain = FilterChain::builder().add_last(|| Shout).build();
//! assert_eq!(chain.names(), vec!["shout"]);
//! ```

mod framing;
mod length_field;
mod logging;

pub use framing::{AckFramingFilter, DecodeState, ACK, DECODE_STATE, MAX_FRAME_LENGTH, REMAINING_LENGTH};
pub use length_field::{LengthFieldCodec, DEFAULT_MAX_FRAME_LENGTH};
pub use logging::LoggingFilter;

use std::{fmt, sync::Arc};

use bytes::Bytes;

use crate::{attributes::AttributeMap, error::Error, session::Session};

/// One stage of a session's protocol pipeline.
///
/// The default implementations pass messages through unchanged and ignore
/// exception and close events.
pub trait Filter: Send + 'static {
    fn name(&self) -> &str;

    /// Bytes or decoded messages travelling from the transport to the application.
    fn on_inbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
        ctx.pass(message);
    }

    /// Messages travelling from the application to the transport.
    fn on_outbound(&mut self, ctx: &mut FilterContext<'_>, message: Bytes) {
        ctx.pass(message);
    }

    /// Invoked head to tail on transport, protocol and handler failures.
    fn on_exception(&mut self, ctx: &mut FilterContext<'_>, error: &Error) {
        let _ = (ctx, error);
    }

    /// Invoked head to tail once, when the session is released.
    fn on_closed(&mut self, ctx: &mut FilterContext<'_>) {
        let _ = ctx;
    }
}

enum Emit {
    Pass(Bytes),
    Write(Bytes),
}

/// A filter's view of its session for the duration of one invocation.
pub struct FilterContext<'a> {
    session: &'a Session,
    attributes: &'a mut AttributeMap,
    emitted: Vec<Emit>,
    failure: Option<Error>,
}

impl<'a> FilterContext<'a> {
    fn new(session: &'a Session, attributes: &'a mut AttributeMap) -> Self {
        Self {
            session,
            attributes,
            emitted: Vec::new(),
            failure: None,
        }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn attributes(&self) -> &AttributeMap {
        &*self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut *self.attributes
    }

    /// Hands `message` to the next filter in the current direction.
    pub fn pass(&mut self, message: Bytes) {
        self.emitted.push(Emit::Pass(message));
    }

    /// Starts an outbound message at this filter.
    pub fn write(&mut self, message: Bytes) {
        self.emitted.push(Emit::Write(message));
    }

    /// Reports a failure for the current event; the first one wins.
    pub fn fail(&mut self, error: Error) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }
}

/// What one traversal produced.
#[derive(Debug, Default)]
pub(crate) struct ChainOutput {
    /// Messages that left the tail, for the handler or the read queue
    pub(crate) delivered: Vec<Bytes>,
    /// Buffers that left the head, in transmission order
    pub(crate) transmit: Vec<Bytes>,
    pub(crate) failure: Option<Error>,
}

struct Traversal<'s, 'a> {
    session: &'s Session,
    attributes: &'a mut AttributeMap,
    out: ChainOutput,
}

pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn builder() -> FilterChainBuilder {
        FilterChainBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }

    pub(crate) fn fire_inbound(
        &mut self,
        session: &Session,
        attributes: &mut AttributeMap,
        message: Bytes,
    ) -> ChainOutput {
        let mut traversal = Traversal {
            session,
            attributes,
            out: ChainOutput::default(),
        };
        self.inbound_at(0, &mut traversal, message);
        traversal.out
    }

    pub(crate) fn fire_outbound(
        &mut self,
        session: &Session,
        attributes: &mut AttributeMap,
        message: Bytes,
    ) -> ChainOutput {
        let mut traversal = Traversal {
            session,
            attributes,
            out: ChainOutput::default(),
        };
        let tail = self.filters.len();
        self.outbound_before(tail, &mut traversal, message);
        traversal.out
    }

    pub(crate) fn fire_exception(
        &mut self,
        session: &Session,
        attributes: &mut AttributeMap,
        error: &Error,
    ) -> ChainOutput {
        let mut traversal = Traversal {
            session,
            attributes,
            out: ChainOutput::default(),
        };
        for index in 0..self.filters.len() {
            let emitted = {
                let mut ctx = FilterContext::new(traversal.session, traversal.attributes);
                self.filters[index].on_exception(&mut ctx, error);
                ctx.emitted
            };
            for emit in emitted {
                if let Emit::Write(message) = emit {
                    self.outbound_before(index, &mut traversal, message);
                }
            }
        }
        traversal.out
    }

    pub(crate) fn fire_closed(&mut self, session: &Session, attributes: &mut AttributeMap) {
        for filter in &mut self.filters {
            let mut ctx = FilterContext::new(session, attributes);
            filter.on_closed(&mut ctx);
        }
    }

    fn inbound_at(&mut self, index: usize, traversal: &mut Traversal<'_, '_>, message: Bytes) {
        if traversal.out.failure.is_some() {
            return;
        }
        if index >= self.filters.len() {
            traversal.out.delivered.push(message);
            return;
        }

        let emitted = {
            let mut ctx = FilterContext::new(traversal.session, traversal.attributes);
            self.filters[index].on_inbound(&mut ctx, message);
            if let Some(error) = ctx.failure.take() {
                traversal.out.failure = Some(error);
            }
            ctx.emitted
        };

        for emit in emitted {
            match emit {
                Emit::Pass(message) => self.inbound_at(index + 1, traversal, message),
                Emit::Write(message) => self.outbound_before(index, traversal, message),
            }
        }
    }

    /// Runs `message` through the filters in front of `end`, tail to head.
    fn outbound_before(&mut self, end: usize, traversal: &mut Traversal<'_, '_>, message: Bytes) {
        if traversal.out.failure.is_some() {
            return;
        }
        if end == 0 {
            traversal.out.transmit.push(message);
            return;
        }

        let index = end - 1;
        let emitted = {
            let mut ctx = FilterContext::new(traversal.session, traversal.attributes);
            self.filters[index].on_outbound(&mut ctx, message);
            if let Some(error) = ctx.failure.take() {
                traversal.out.failure = Some(error);
            }
            ctx.emitted
        };

        for emit in emitted {
            match emit {
                Emit::Pass(message) | Emit::Write(message) => {
                    self.outbound_before(index, traversal, message);
                }
            }
        }
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;

/// Describes a chain; every session gets fresh filter instances from it.
#[derive(Clone, Default)]
pub struct FilterChainBuilder {
    factories: Vec<FilterFactory>,
}

impl FilterChainBuilder {
    pub fn add_last<F, M>(mut self, make: M) -> Self
    where
        F: Filter,
        M: Fn() -> F + Send + Sync + 'static,
    {
        self.factories
            .push(Arc::new(move || -> Box<dyn Filter> { Box::new(make()) }));
        self
    }

    pub fn add_first<F, M>(mut self, make: M) -> Self
    where
        F: Filter,
        M: Fn() -> F + Send + Sync + 'static,
    {
        self.factories
            .insert(0, Arc::new(move || -> Box<dyn Filter> { Box::new(make()) }));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn build(&self) -> FilterChain {
        FilterChain {
            filters: self.factories.iter().map(|make| make()).collect(),
        }
    }
}

impl fmt::Debug for FilterChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChainBuilder")
            .field("filters", &self.factories.len())
            .finish()
    }
}
