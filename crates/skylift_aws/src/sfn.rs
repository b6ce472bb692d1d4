//! Step Functions implementation of the activity coordinator seam.

use async_trait::async_trait;
use skylift_core::worker::{ActivityCoordinator, PolledTask};
use skylift_core::BoxError;

/// [`ActivityCoordinator`] over a Step Functions activity.
#[derive(Clone)]
pub struct SfnCoordinator {
    client: aws_sdk_sfn::Client,
}

impl SfnCoordinator {
    pub fn new(client: aws_sdk_sfn::Client) -> Self {
        Self { client }
    }

    /// Builds a coordinator from the ambient AWS configuration.
    pub async fn from_env() -> Self {
        Self::new(crate::client::sfn_client().await)
    }
}

#[async_trait]
impl ActivityCoordinator for SfnCoordinator {
    async fn poll_task(
        &self,
        activity_arn: &str,
        worker_name: &str,
    ) -> Result<Option<PolledTask>, BoxError> {
        let polled = self
            .client
            .get_activity_task()
            .activity_arn(activity_arn)
            .worker_name(worker_name)
            .send()
            .await?;
        Ok(polled_task(polled.task_token(), polled.input()))
    }

    async fn heartbeat(&self, task_token: &str) -> Result<(), BoxError> {
        self.client
            .send_task_heartbeat()
            .task_token(task_token)
            .send()
            .await?;
        Ok(())
    }

    async fn report_success(&self, task_token: &str, output: &str) -> Result<(), BoxError> {
        self.client
            .send_task_success()
            .task_token(task_token)
            .output(output)
            .send()
            .await?;
        Ok(())
    }

    async fn report_failure(
        &self,
        task_token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), BoxError> {
        self.client
            .send_task_failure()
            .task_token(task_token)
            .error(error)
            .cause(cause)
            .send()
            .await?;
        Ok(())
    }
}

/// An absent or empty task token means the long poll timed out with no work.
fn polled_task(token: Option<&str>, input: Option<&str>) -> Option<PolledTask> {
    let token = token.filter(|token| !token.is_empty())?;
    Some(PolledTask {
        token: token.to_string(),
        input: input.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_empty_token_means_no_task() {
        assert_eq!(polled_task(None, None), None);
        assert_eq!(polled_task(Some(""), Some("{}")), None);
    }

    #[test]
    fn token_and_input_are_carried_through() {
        let task = polled_task(Some("token-1"), Some("{\"a\":1}")).expect("task should exist");
        assert_eq!(task.token, "token-1");
        assert_eq!(task.input.as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn token_without_input_is_still_a_task() {
        let task = polled_task(Some("token-1"), None).expect("task should exist");
        assert_eq!(task.input, None);
    }
}
