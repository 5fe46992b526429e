//! Cookie database and format translation.

mod record;
mod store;
mod sync;

pub use record::{
    engine_time_from_unix_secs, engine_time_now, unix_secs_from_engine_time, CookieRecord,
    SameSite,
};
pub use store::CookieStore;
pub use sync::{CookieSync, ExportFormat};
