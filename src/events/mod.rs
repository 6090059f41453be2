//! Event envelopes and the trace-to-event mapping

pub mod envelope;
pub mod transform;

pub use envelope::{
    is_reserved_attribute, is_valid_extension_name, EventEnvelope, ExtensionValue, Extensions,
    APPLICATION_JSON, RESERVED_ATTRIBUTES, SPEC_VERSION,
};
pub use transform::{AccountIdentity, EventTransformer, TransformError};
