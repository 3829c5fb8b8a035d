#![allow(unused_imports)]

pub use crate::error::{Error, Result};
pub use async_trait::async_trait;
pub use indexmap::IndexMap;
pub use log::{debug, error, info, warn};
pub use std::sync::{Arc, Mutex, RwLock};
