use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use sd_core::{FetchError, FetchResult, TaskId};
use tokio::sync::oneshot;

/// Caller's side of a registry task.
///
/// Resolves with the action's result, or with [`FetchError::Cancelled`] when
/// the task is cancelled, overwritten, or its registry goes away. Dropping
/// the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<FetchResult<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<FetchResult<T>>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = FetchResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(FetchError::Cancelled {
                task_id: this.id.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
