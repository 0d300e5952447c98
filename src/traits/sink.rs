// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::errors::BoxError;

/// Terminal consumer at the end of a stream pipeline.
#[async_trait]
pub trait StageSink<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Accept one item. An error stops the pipeline.
    async fn accept(&self, item: T) -> Result<(), BoxError>;

    /// Called once after the last item of a successful run.
    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
