use crate::error::StoreError;
use crate::record::Record;
use crate::schema::TypeDescriptor;

/// A Rust type mirroring a record type.
///
/// Usually derived with `#[derive(Model)]`; the derive builds the
/// descriptor from field attributes and decodes each field through the
/// record.
pub trait Model: Sized {
    /// The descriptor to register for this type.
    fn descriptor() -> TypeDescriptor;

    /// Reads the current values of `record`.
    fn from_record(record: &Record) -> Result<Self, StoreError>;

    fn type_name() -> String {
        Self::descriptor().name().to_string()
    }
}
