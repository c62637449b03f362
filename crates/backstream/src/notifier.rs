//! Slack webhook notifications for task results

use backstream_tasks::{TaskResult, TaskResults, TaskStatus};
use futures::future::join_all;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from delivering notifications, one entry per failed webhook
#[derive(Debug, Error)]
#[error("{}", .0.join("; "))]
pub struct NotifyError(pub Vec<String>);

/// Posts Block Kit messages to every configured webhook
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhooks: Vec<String>,
}

impl SlackNotifier {
    pub fn new(webhooks: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhooks,
        }
    }

    /// Block for a single result; skipped tasks produce none
    pub fn format(result: &TaskResult) -> Option<Value> {
        match result.status {
            TaskStatus::Skipped => None,
            TaskStatus::Success => Some(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        ":white_check_mark: Backup task `{}` completed successfully.",
                        result.name()
                    ),
                },
            })),
            TaskStatus::Failed | TaskStatus::Timeout => {
                let error = result
                    .errors
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| result.status.as_str().to_string());
                Some(json!({
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": format!(
                            ":rotating_light: *Error running backup task `{}`!* @channel",
                            result.name()
                        ),
                    },
                    "fields": [
                        field("Command", &result.task.command_string()),
                        field(
                            "Working directory",
                            &result.task.actual_cwd().display().to_string()
                        ),
                        field("Error", &error),
                        field("Log lines (written to stderr)", &result.logs.join("\n")),
                    ],
                }))
            }
        }
    }

    /// Full message for a run, `None` when there is nothing to report
    pub fn message(results: &TaskResults) -> Option<Value> {
        let blocks: Vec<Value> = results.iter().filter_map(Self::format).collect();
        if blocks.is_empty() {
            return None;
        }
        Some(json!({ "blocks": blocks }))
    }

    /// Report the results of a run
    pub async fn notify(&self, results: &TaskResults) -> Result<(), NotifyError> {
        match Self::message(results) {
            Some(body) => self.send(&body).await,
            None => {
                debug!("no results to notify");
                Ok(())
            }
        }
    }

    /// Report an error that prevented the run from completing
    pub async fn error(&self, error: &anyhow::Error) -> Result<(), NotifyError> {
        let body = json!({
            "blocks": [{
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        ":rotating_light: *Error running backup task!* @channel\n```\n{:#}\n```",
                        error
                    ),
                },
            }],
        });
        self.send(&body).await
    }

    /// Post `body` to all webhooks concurrently
    pub async fn send(&self, body: &Value) -> Result<(), NotifyError> {
        let requests = self.webhooks.iter().map(|url| async move {
            let response = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| format!("error sending notification to {}: {}", url, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(format!(
                    "error sending notification to {}: {}",
                    url, status
                ));
            }
            Ok(())
        });

        let failures: Vec<String> = join_all(requests)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            for failure in &failures {
                warn!(error = %failure, "notification failed");
            }
            Err(NotifyError(failures))
        }
    }
}

fn field(title: &str, body: &str) -> Value {
    json!({
        "type": "mrkdwn",
        "text": format!("*{}:*\n```\n{}\n```", title, body.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use backstream_tasks::{Task, TaskError, TaskErrorKind, TaskErrors};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn result(name: &str, status: TaskStatus) -> TaskResult {
        let task = Arc::new(Task::new(name, ["echo", "hello world"]).with_cwd("/srv/backups"));
        let errors = match status {
            TaskStatus::Failed => Some(TaskErrors::from(TaskError::new(
                TaskErrorKind::CommandFailed,
                "exit status: 1",
            ))),
            _ => None,
        };
        TaskResult {
            status,
            task,
            logs: vec!["dumping".to_string(), "ERROR: broken".to_string()],
            errors,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_skipped_results_produce_no_block() {
        let results: TaskResults = vec![result("a", TaskStatus::Skipped)].into_iter().collect();
        assert!(SlackNotifier::message(&results).is_none());
    }

    #[test]
    fn test_success_block() {
        let block = SlackNotifier::format(&result("db", TaskStatus::Success)).unwrap();
        assert_eq!(
            block["text"]["text"],
            ":white_check_mark: Backup task `db` completed successfully."
        );
        assert!(block.get("fields").is_none());
    }

    #[test]
    fn test_failure_block() {
        let block = SlackNotifier::format(&result("db", TaskStatus::Failed)).unwrap();
        assert_eq!(
            block["text"]["text"],
            ":rotating_light: *Error running backup task `db`!* @channel"
        );

        let fields = block["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0]["text"], "*Command:*\n```\necho 'hello world'\n```");
        assert_eq!(fields[1]["text"], "*Working directory:*\n```\n/srv/backups\n```");
        assert_eq!(fields[2]["text"], "*Error:*\n```\ncommand failed: exit status: 1\n```");
        assert_eq!(
            fields[3]["text"],
            "*Log lines (written to stderr):*\n```\ndumping\nERROR: broken\n```"
        );
    }

    #[test]
    fn test_message_keeps_result_order() {
        let results: TaskResults = vec![
            result("a", TaskStatus::Skipped),
            result("b", TaskStatus::Success),
            result("c", TaskStatus::Timeout),
        ]
        .into_iter()
        .collect();

        let message = SlackNotifier::message(&results).unwrap();
        let blocks = message["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1]["text"]["text"].as_str().unwrap().contains("`c`"));
    }

    /// Serve `responses` HTTP requests with the given status code
    async fn serve(status: u16, responses: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        format!("http://{}/hook", addr)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_send_succeeds() {
        let url = serve(200, 1).await;
        let notifier = SlackNotifier::new(vec![url]);

        let results: TaskResults = vec![result("db", TaskStatus::Success)].into_iter().collect();
        notifier.notify(&results).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_collects_failures() {
        let ok = serve(200, 1).await;
        let failing = serve(500, 1).await;
        let notifier = SlackNotifier::new(vec![ok, failing.clone()]);

        let err = notifier
            .error(&anyhow::anyhow!("config not found"))
            .await
            .unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert!(err.0[0].contains(&failing));
        assert!(err.0[0].contains("500"));
    }

    #[tokio::test]
    async fn test_nothing_sent_without_blocks() {
        let notifier = SlackNotifier::new(vec!["http://127.0.0.1:9/unreachable".to_string()]);
        let results: TaskResults = vec![result("a", TaskStatus::Skipped)].into_iter().collect();
        notifier.notify(&results).await.unwrap();
    }
}
