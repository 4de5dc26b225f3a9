//! What handlers return and what the host writes back.

use crate::error::HandlerError;
use crate::publisher::Publisher;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::fmt;

/// A lazy, possibly infinite sequence of response elements.
pub type ValueStream = BoxStream<'static, Result<Value, HandlerError>>;

/// Value produced by a suspendable handler.
pub enum HandlerOutput {
    /// A single response entity.
    Value(Value),

    /// The "no content" marker: nothing is stored in the result slot.
    NoContent,

    /// A push sequence, adapted to a [`Publisher`] before it reaches the host.
    Stream(ValueStream),
}

impl HandlerOutput {
    /// Wrap a single entity.
    #[must_use]
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// Wrap a fallible element stream.
    #[must_use]
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Whether this is the "no content" marker.
    #[must_use]
    pub const fn is_no_content(&self) -> bool {
        matches!(self, Self::NoContent)
    }
}

impl fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("HandlerOutput::Value").field(value).finish(),
            Self::NoContent => write!(f, "HandlerOutput::NoContent"),
            Self::Stream(_) => write!(f, "HandlerOutput::Stream(<stream>)"),
        }
    }
}

/// Response stored in a request's result slot.
pub enum ResponseBody {
    /// A single entity for the host's serializers.
    Value(Value),

    /// A publisher for the host's streaming response writer.
    Stream(Box<dyn Publisher<Value>>),
}

impl ResponseBody {
    /// The single entity, if this is not a stream.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    /// Take the publisher out of a streaming body.
    #[must_use]
    pub fn into_publisher(self) -> Option<Box<dyn Publisher<Value>>> {
        match self {
            Self::Value(_) => None,
            Self::Stream(publisher) => Some(publisher),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("ResponseBody::Value").field(value).finish(),
            Self::Stream(_) => write!(f, "ResponseBody::Stream(<publisher>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn no_content_marker() {
        assert!(HandlerOutput::NoContent.is_no_content());
        assert!(!HandlerOutput::value("hi").is_no_content());
    }

    #[test]
    fn debug_hides_streams() {
        let output = HandlerOutput::stream(stream::empty());
        assert_eq!(format!("{output:?}"), "HandlerOutput::Stream(<stream>)");
    }

    #[test]
    fn value_body_accessors() {
        let body = ResponseBody::Value(Value::from(3));
        assert_eq!(body.as_value(), Some(&Value::from(3)));
        assert!(body.into_publisher().is_none());
    }
}
