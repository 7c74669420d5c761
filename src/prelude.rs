pub use anyhow::{Context, Result};
#[allow(unused_imports)]
pub use log::{debug, error, info, trace, warn};
