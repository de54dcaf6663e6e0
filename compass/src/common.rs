pub use log::{info, warn};
