pub mod envelope;
pub mod ingestor;
pub mod store;

pub use envelope::{MalformedPayload, RawEnvelope, RawMeasurement, parse_envelope};
pub use ingestor::{IngestError, IngestReport, Ingestor, ValidationFailure};
pub use store::{BatchOutcome, DeviceDirectory, MeasurementStore, SensorBinding};
