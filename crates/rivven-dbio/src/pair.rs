//! Element/restriction pairs and their codec
//!
//! Wire form: `[element, self-delimiting][restriction, rest of the value]`.
//! The element is always written in the nested context so the decoder can
//! find where it ends; the restriction is written in the enclosing context,
//! which for a standalone value is `Outer` and needs no length prefix.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use crate::codec::{Codec, Context};
use crate::error::{Error, Result};

/// An element together with the restriction describing the part of it that
/// remains to be processed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestrictionPair<E, R> {
    /// The element
    pub element: E,
    /// The restriction
    pub restriction: R,
}

impl<E, R> RestrictionPair<E, R> {
    /// Create a pair
    pub fn new(element: E, restriction: R) -> Self {
        Self {
            element,
            restriction,
        }
    }

    /// Split into `(element, restriction)`
    pub fn into_parts(self) -> (E, R) {
        (self.element, self.restriction)
    }
}

impl<E, R> From<(E, R)> for RestrictionPair<E, R> {
    fn from((element, restriction): (E, R)) -> Self {
        Self::new(element, restriction)
    }
}

/// Codec for [`RestrictionPair`] built from an element and a restriction codec
pub struct PairCodec<E, R> {
    element: Arc<dyn Codec<E>>,
    restriction: Arc<dyn Codec<R>>,
}

impl<E, R> Clone for PairCodec<E, R> {
    fn clone(&self) -> Self {
        Self {
            element: Arc::clone(&self.element),
            restriction: Arc::clone(&self.restriction),
        }
    }
}

impl<E, R> std::fmt::Debug for PairCodec<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairCodec")
            .field("element", &self.element.name())
            .field("restriction", &self.restriction.name())
            .finish()
    }
}

impl<E, R> PairCodec<E, R> {
    /// Combine two sub-codecs
    pub fn of(
        element: impl Codec<E> + 'static,
        restriction: impl Codec<R> + 'static,
    ) -> Self {
        Self {
            element: Arc::new(element),
            restriction: Arc::new(restriction),
        }
    }

    /// Element sub-codec
    pub fn element_codec(&self) -> &Arc<dyn Codec<E>> {
        &self.element
    }

    /// Restriction sub-codec
    pub fn restriction_codec(&self) -> &Arc<dyn Codec<R>> {
        &self.restriction
    }

    /// Encode a pair that may be absent; an absent pair is an [`Error::Encode`]
    pub fn encode_nullable(
        &self,
        pair: Option<&RestrictionPair<E, R>>,
        buf: &mut BytesMut,
        context: Context,
    ) -> Result<()> {
        match pair {
            Some(pair) => self.encode(pair, buf, context),
            None => Err(Error::encode("cannot encode a null RestrictionPair")),
        }
    }
}

impl<E, R> Codec<RestrictionPair<E, R>> for PairCodec<E, R> {
    fn encode(
        &self,
        pair: &RestrictionPair<E, R>,
        buf: &mut BytesMut,
        context: Context,
    ) -> Result<()> {
        self.element.encode(&pair.element, buf, Context::Nested)?;
        self.restriction.encode(&pair.restriction, buf, context)
    }

    fn decode(&self, buf: &mut Bytes, context: Context) -> Result<RestrictionPair<E, R>> {
        let element = self.element.decode(buf, Context::Nested)?;
        let restriction = self.restriction.decode(buf, context)?;
        Ok(RestrictionPair::new(element, restriction))
    }

    fn name(&self) -> String {
        format!(
            "PairCodec({}, {})",
            self.element.name(),
            self.restriction.name()
        )
    }
}
