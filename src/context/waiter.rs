use backon::{ExponentialBuilder, Retryable};
use std::{future::Future, time::Duration};
use tokio::time::Instant;
use tracing::debug;

use super::Context;
use crate::error::StratusError;

/// One observation of a resource that is settling.
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    /// Not terminal yet; carries the observed state for logging.
    Pending(String),
}

enum WaitError {
    NotYet(String),
    Failed(StratusError),
}

impl Context {
    /// Polls `probe` with exponential backoff between the configured min and max delay until it
    /// reports `Ready`, or the total wait budget runs out.
    pub async fn wait_for<T, F, Fut>(&self, what: &str, probe: F) -> Result<T, StratusError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Probe<T>, StratusError>>,
    {
        let policy = &self.settings.waiter;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(policy.min_delay)
            .with_max_delay(policy.max_delay.max(policy.min_delay))
            .with_max_times(usize::MAX);
        let budget = policy.max_wait;
        let started = Instant::now();

        let observe = || async {
            match probe().await {
                Ok(Probe::Ready(value)) => Ok(value),
                Ok(Probe::Pending(state)) => Err(WaitError::NotYet(state)),
                Err(e) => Err(WaitError::Failed(e)),
            }
        };

        let outcome = observe
            .retry(backoff)
            .when(|e: &WaitError| matches!(e, WaitError::NotYet(_)) && started.elapsed() < budget)
            .notify(|e: &WaitError, dur: Duration| {
                if let WaitError::NotYet(state) = e {
                    debug!(what, state = %state, "Waiting {:?} before polling again", dur);
                }
            })
            .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(WaitError::NotYet(_)) => Err(StratusError::Timeout {
                what: what.to_string(),
                waited: started.elapsed(),
            }),
            Err(WaitError::Failed(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineSettings;
    use crate::db::TargetStore;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use stratus_cloud::{Credentials, SimulatedCloud};

    async fn context(settings: EngineSettings) -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TargetStore::new(dir.path());
        let pool = store
            .connect(
                "waiter",
                &Credentials::new("AKID", "secret"),
                &["us-east-1".to_string()],
            )
            .await
            .unwrap();
        let ctx = Context::open(
            "waiter",
            pool,
            Arc::new(SimulatedCloud::default()),
            settings,
        )
        .await
        .unwrap();
        (dir, ctx)
    }

    #[tokio::test]
    async fn returns_once_ready() {
        let (_dir, ctx) = context(EngineSettings::fast()).await;
        let polls = AtomicU32::new(0);

        let value = ctx
            .wait_for("endpoint vpce-1", || async {
                if polls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Probe::Pending("pending".to_string()))
                } else {
                    Ok(Probe::Ready("available"))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "available");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_when_never_ready() {
        let mut settings = EngineSettings::fast();
        settings.waiter.max_wait = Duration::from_millis(30);
        let (_dir, ctx) = context(settings).await;

        let err = ctx
            .wait_for("instance i-1", || async {
                Ok::<Probe<()>, StratusError>(Probe::Pending("pending".to_string()))
            })
            .await
            .unwrap_err();

        match err {
            StratusError::Timeout { what, waited } => {
                assert_eq!(what, "instance i-1");
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_polls_stop_waiting() {
        let (_dir, ctx) = context(EngineSettings::fast()).await;
        let err = ctx
            .wait_for("topic", || async {
                Err::<Probe<()>, _>(StratusError::validation("gone wrong"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StratusError::Validation(_)));
    }
}
