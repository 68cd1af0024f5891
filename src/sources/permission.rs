// src/sources/permission.rs
//! Location permission for platforms without a runtime prompt

use super::LocationPermission;
use async_trait::async_trait;

/// Permission fixed by configuration. Requesting cannot change the answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission {
    granted: bool,
}

impl StaticPermission {
    pub fn new(granted: bool) -> Self {
        Self { granted }
    }
}

#[async_trait]
impl LocationPermission for StaticPermission {
    async fn has_foreground_permission(&self) -> bool {
        self.granted
    }

    async fn request_foreground_permission(&mut self) -> bool {
        self.granted
    }
}
