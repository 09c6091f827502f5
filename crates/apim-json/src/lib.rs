//! JSON sanitization for management payloads: null stripping, schema-driven
//! sanitization, an HTML safety screen and a path-based patch engine.

pub mod html;
pub mod patch;
pub mod path;
pub mod schema;
pub mod value;

pub use patch::{JsonPatch, PatchError, PatchOperation, apply, execute};
pub use path::{JsonPath, Location, PathError, Segment, Step};
pub use schema::{JsonSchemaValidator, SchemaError};
pub use value::strip_nulls;
