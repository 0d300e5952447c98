// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::future::Future;

use crate::errors::BoxError;

/// Maps one batch of items to its outputs.
///
/// Implementations receive the items of a batch in source order and may
/// return fewer outputs than inputs. Any async closure of the shape
/// `Fn(Vec<T>) -> impl Future<Output = Result<Vec<O>, BoxError>>` is a
/// `BatchTransform` through the blanket impl below.
///
/// ```rust
/// use the_sluice::errors::BoxError;
/// use the_sluice::traits::BatchTransform;
///
/// fn assert_transform<T: BatchTransform<u32, u32>>(_: &T) {}
///
/// let double = |batch: Vec<u32>| async move {
///     Ok::<_, BoxError>(batch.into_iter().map(|v| v * 2).collect::<Vec<_>>())
/// };
/// assert_transform(&double);
/// ```
#[async_trait]
pub trait BatchTransform<T, O>: Send + Sync
where
    T: Send + 'static,
    O: Send + 'static,
{
    async fn transform(&self, batch: Vec<T>) -> Result<Vec<O>, BoxError>;
}

#[async_trait]
impl<T, O, F, Fut> BatchTransform<T, O> for F
where
    T: Send + 'static,
    O: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<O>, BoxError>> + Send + 'static,
{
    async fn transform(&self, batch: Vec<T>) -> Result<Vec<O>, BoxError> {
        (self)(batch).await
    }
}

/// Maps a single item, used by transform stages.
#[async_trait]
pub trait ItemTransform<T, O>: Send + Sync
where
    T: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, item: T) -> Result<O, BoxError>;
}

#[async_trait]
impl<T, O, F, Fut> ItemTransform<T, O> for F
where
    T: Send + 'static,
    O: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, BoxError>> + Send + 'static,
{
    async fn apply(&self, item: T) -> Result<O, BoxError> {
        (self)(item).await
    }
}
