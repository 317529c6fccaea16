//! Server-sent stream of newly delegated tasks.
//!
//! The stream is single-shot: it closes after the first `new_tasks` event,
//! after an `error` event, or once the wall-clock budget is spent (with a
//! final `keepalive`). Clients reconnect with `Last-Event-ID` to resume.

use std::convert::Infallible;
use std::future::Future;
use std::time::Instant;

use actix_web::{
    HttpRequest, HttpResponse,
    http::header,
    rt::time::{sleep, timeout},
    web::{self, Bytes},
};
use chrono::{NaiveDateTime, Utc};
use derive_more::Display;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{debug, error, warn};

use crate::{
    auth::auth::RequestContext,
    config::{Config, StreamSettings},
    db::is_connection_error,
    model::{datetime, task::Task},
};

/// Rows fetched per cycle before topping up the last second.
const MAX_ROWS_PER_EVENT: u32 = 200;

#[derive(Debug, Display)]
pub enum FeedError {
    /// The store could not be reached this cycle; worth retrying
    #[display(fmt = "store unavailable: {}", _0)]
    Connect(sqlx::Error),
    /// The statement itself failed; retrying will not help
    #[display(fmt = "query failed: {}", _0)]
    Query(sqlx::Error),
}

/// Source of newly created open tasks for one doer.
///
/// A batch never ends partway through a `created_at` second: the newest
/// row becomes the next watermark and later reads only ask for rows strictly
/// after it.
pub trait TaskFeed {
    fn new_tasks(
        &self,
        doer_id: u64,
        since: NaiveDateTime,
    ) -> impl Future<Output = Result<Vec<Task>, FeedError>>;
}

/// Reads `tasks` through a connection held only for the duration of a cycle.
pub struct MySqlTaskFeed {
    pool: MySqlPool,
}

impl MySqlTaskFeed {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

impl TaskFeed for MySqlTaskFeed {
    async fn new_tasks(&self, doer_id: u64, since: NaiveDateTime) -> Result<Vec<Task>, FeedError> {
        let mut conn = self.pool.acquire().await.map_err(FeedError::Connect)?;

        let mut rows = sqlx::query_as::<_, Task>(&format!(
            "{SELECT_NEW} AND created_at > ? ORDER BY created_at ASC, id ASC LIMIT ?"
        ))
        .bind(doer_id)
        .bind(since)
        .bind(MAX_ROWS_PER_EVENT)
        .fetch_all(&mut *conn)
        .await
        .map_err(classify)?;

        if let Some((second, last_id)) = truncated_tail(&rows, MAX_ROWS_PER_EVENT as usize) {
            let rest = sqlx::query_as::<_, Task>(&format!(
                "{SELECT_NEW} AND created_at = ? AND id > ? ORDER BY id ASC"
            ))
            .bind(doer_id)
            .bind(second)
            .bind(last_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(classify)?;
            rows.extend(rest);
        }

        // release before the caller sleeps
        drop(conn);
        Ok(rows)
    }
}

const SELECT_NEW: &str = r#"
    SELECT id, task_code, doer_id, doer_name, department_id, description,
           planned_date, actual_date, status, delay_flag, delay_seconds, created_at
    FROM tasks
    WHERE doer_id = ?
    AND status IN ('pending', 'shifted')"#;

fn classify(e: sqlx::Error) -> FeedError {
    if is_connection_error(&e) {
        FeedError::Connect(e)
    } else {
        FeedError::Query(e)
    }
}

/// For a batch that hit `cap`, the second of its last row and that row's id.
/// Rows sharing that second may lie beyond the cap.
fn truncated_tail(rows: &[Task], cap: usize) -> Option<(NaiveDateTime, u64)> {
    if rows.len() < cap {
        return None;
    }
    rows.last().map(|t| (t.created_at, t.id))
}

/// One SSE frame.
#[derive(Debug)]
pub struct SseEvent<'a> {
    pub event: &'a str,
    pub id: Option<String>,
    pub retry_ms: Option<u64>,
    pub data: String,
}

impl SseEvent<'_> {
    pub fn to_bytes(&self) -> Bytes {
        let mut out = format!("event: {}\n", self.event);
        if let Some(id) = &self.id {
            out.push_str(&format!("id: {id}\n"));
        }
        if let Some(retry) = self.retry_ms {
            out.push_str(&format!("retry: {retry}\n"));
        }
        for line in self.data.lines() {
            out.push_str(&format!("data: {line}\n"));
        }
        if self.data.is_empty() {
            out.push_str("data: \n");
        }
        out.push('\n');
        Bytes::from(out)
    }
}

#[derive(Serialize)]
struct NewTasksPayload<'a> {
    tasks: &'a [Task],
    count: usize,
    since: String,
}

#[derive(Serialize)]
struct KeepAlivePayload {
    time: String,
    since: String,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    message: &'a str,
}

/// `since` wins when given (falling back to now if malformed); otherwise
/// `Last-Event-ID`; otherwise now.
pub fn watermark(
    since: Option<&str>,
    last_event_id: Option<&str>,
    now: NaiveDateTime,
) -> NaiveDateTime {
    match since {
        Some(raw) => datetime::parse(raw).unwrap_or(now),
        None => last_event_id.and_then(datetime::parse).unwrap_or(now),
    }
}

struct Poller<F> {
    feed: F,
    doer_id: u64,
    since: NaiveDateTime,
    settings: StreamSettings,
    started: Instant,
    last_keepalive: Instant,
    next_delay: Option<std::time::Duration>,
    closed: bool,
}

impl<F: TaskFeed> Poller<F> {
    fn frame(&self, event: &'static str, id: Option<String>, data: String) -> Bytes {
        SseEvent {
            event,
            id,
            retry_ms: Some(self.settings.retry_hint_ms),
            data,
        }
        .to_bytes()
    }

    fn keepalive(&mut self) -> Bytes {
        self.last_keepalive = Instant::now();
        let payload = KeepAlivePayload {
            time: datetime::format(&Utc::now().naive_utc()),
            since: datetime::format(&self.since),
        };
        let data = serde_json::to_string(&payload).unwrap_or_default();
        self.frame("keepalive", None, data)
    }

    fn fail(&mut self, message: &str) -> Bytes {
        self.closed = true;
        let data = serde_json::to_string(&ErrorPayload { message }).unwrap_or_default();
        self.frame("error", None, data)
    }

    fn deliver(&mut self, rows: Vec<Task>) -> Bytes {
        self.closed = true;
        let newest = rows
            .iter()
            .map(|t| t.created_at)
            .max()
            .unwrap_or(self.since);
        let id = datetime::format(&newest);

        let payload = NewTasksPayload {
            tasks: &rows,
            count: rows.len(),
            since: id.clone(),
        };
        match serde_json::to_string(&payload) {
            Ok(data) => self.frame("new_tasks", Some(id), data),
            Err(e) => {
                error!(error = %e, "Failed to encode task event");
                self.fail("Failed to encode tasks")
            }
        }
    }

    async fn next_frame(&mut self) -> Option<Bytes> {
        if self.closed {
            return None;
        }

        loop {
            if let Some(delay) = self.next_delay.take() {
                let remaining = self.settings.budget.saturating_sub(self.started.elapsed());
                sleep(delay.min(remaining)).await;
            }

            if self.started.elapsed() >= self.settings.budget {
                debug!(doer_id = self.doer_id, "Task stream budget spent");
                self.closed = true;
                return Some(self.keepalive());
            }

            let remaining = self.settings.budget.saturating_sub(self.started.elapsed());
            let Ok(cycle) = timeout(remaining, self.feed.new_tasks(self.doer_id, self.since)).await
            else {
                warn!(doer_id = self.doer_id, "Task stream store call outlasted the budget");
                self.closed = true;
                return Some(self.keepalive());
            };

            match cycle {
                Ok(mut rows) => {
                    rows.retain(|t| t.created_at > self.since);
                    if !rows.is_empty() {
                        debug!(doer_id = self.doer_id, count = rows.len(), "New tasks found");
                        return Some(self.deliver(rows));
                    }

                    self.next_delay = Some(self.settings.poll_interval);
                    if self.last_keepalive.elapsed() >= self.settings.keepalive_every {
                        return Some(self.keepalive());
                    }
                }
                Err(FeedError::Connect(e)) => {
                    warn!(error = %e, doer_id = self.doer_id, "Task stream store unavailable, backing off");
                    self.next_delay = Some(self.settings.reconnect_backoff);
                    return Some(self.keepalive());
                }
                Err(FeedError::Query(e)) => {
                    error!(error = %e, doer_id = self.doer_id, "Task stream query failed");
                    return Some(self.fail("Failed to load tasks"));
                }
            }
        }
    }
}

/// Frames for one connection. Dropping the stream (client gone) stops the
/// polling: no further cycle runs once the transport stops asking.
pub fn event_stream<F>(
    feed: F,
    doer_id: u64,
    since: NaiveDateTime,
    settings: StreamSettings,
) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    F: TaskFeed + 'static,
{
    let now = Instant::now();
    let poller = Poller {
        feed,
        doer_id,
        since,
        settings,
        started: now,
        last_keepalive: now,
        next_delay: None,
        closed: false,
    };

    stream::unfold(poller, |mut poller| async move {
        let frame = poller.next_frame().await?;
        Some((Ok(frame), poller))
    })
}

#[derive(Deserialize)]
pub struct StreamQuery {
    pub since: Option<String>,
}

/// Push newly assigned open tasks as server-sent events
#[utoipa::path(
    get,
    path = "/api/tasks/stream",
    params(
        ("since" = Option<String>, Query, description = "Watermark, YYYY-MM-DD HH:MM:SS; defaults to Last-Event-ID, then now"),
        ("Last-Event-ID" = Option<String>, Header, description = "Resumption watermark")
    ),
    responses(
        (status = 200, description = "text/event-stream with new_tasks, keepalive and error events"),
        (status = 401, description = "Not logged in")
    ),
    security(("bearer_auth" = [])),
    tag = "Tasks"
)]
pub async fn task_stream(
    req: HttpRequest,
    ctx: RequestContext,
    query: web::Query<StreamQuery>,
    config: web::Data<Config>,
) -> HttpResponse {
    let last_event_id = req
        .headers()
        .get("Last-Event-ID")
        .and_then(|h| h.to_str().ok());
    let since = watermark(
        query.since.as_deref(),
        last_event_id,
        Utc::now().naive_utc(),
    );

    debug!(
        user_id = ctx.user.user_id,
        since = %datetime::format(&since),
        "Task stream opened"
    );

    let frames = event_stream(
        MySqlTaskFeed::new(ctx.pool),
        ctx.user.user_id,
        since,
        config.stream.clone(),
    );

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(frames)
}
