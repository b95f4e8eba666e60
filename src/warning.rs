//! Per-item warning collection.
//!
//! Conversion degrades instead of failing (fallback paragraphs, images kept
//! as markdown text). Those degradations are recorded here so the queue can
//! attach them to the item that produced them.

use std::{cell::RefCell, future::Future};

tokio::task_local! {
    static ITEM_WARNINGS: RefCell<Vec<String>>;
}

/// Record a warning for the queue item being processed. Outside of
/// [`scoped`] this is a no-op.
pub fn collect(message: impl Into<String>) {
    let _ = ITEM_WARNINGS.try_with(|warnings| warnings.borrow_mut().push(message.into()));
}

/// Run `work` with its own warning buffer and return what it recorded.
pub async fn scoped<F, T>(work: F) -> (T, Vec<String>)
where
    F: Future<Output = T>,
{
    ITEM_WARNINGS
        .scope(RefCell::new(Vec::new()), async {
            let output = work.await;
            let warnings = ITEM_WARNINGS.with(|warnings| warnings.take());
            (output, warnings)
        })
        .await
}

#[macro_export]
macro_rules! warn_entry {
    ($($arg:tt)*) => {
        $crate::warning::collect(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use futures::future::join;

    use super::*;

    #[tokio::test]
    async fn warnings_stay_with_their_item() {
        let first = scoped(async {
            crate::warn_entry!("first {}", 1);
            tokio::task::yield_now().await;
            "a"
        });
        let second = scoped(async {
            tokio::task::yield_now().await;
            crate::warn_entry!("second");
            "b"
        });
        let ((a, first), (b, second)) = join(first, second).await;
        assert_eq!((a, first), ("a", vec!["first 1".to_string()]));
        assert_eq!((b, second), ("b", vec!["second".to_string()]));
    }

    #[test]
    fn outside_scope_is_ignored() {
        collect("nobody listens");
    }
}
