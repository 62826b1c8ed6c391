//! Portal session: form state, request bodies, transport, and the export driver.

pub mod driver;
pub mod form_state;
pub mod request;
pub mod transport;

pub use driver::{ExportError, ExportSummary, ProtocolDriver, ReportWindow, Round};
pub use form_state::{extract_field_value, extract_marker_token, InitialFormState, StateToken};
pub use request::{FormSettings, RequestBody};
pub use transport::{HttpPortal, PortalResponse, PortalSettings, PortalTransport, ProtocolError};
