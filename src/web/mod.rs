pub mod pages;
pub mod responses;
pub mod router;
pub mod state;
pub mod templates;

pub use responses::{JobSubmission, json_error};
pub use router::build_router;
pub use state::AppState;
pub use templates::escape_html;
