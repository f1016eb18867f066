// Action execution - side-effect seam plus the per-kind dispatch

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::services::email::EmailService;

use super::registry::ActionKind;
use super::variables::RuntimeContext;

/// Side effects an automation step can perform. The engine never touches the
/// database or the network directly for a step; everything goes through here,
/// which is what lets tests record calls instead of performing them.
#[async_trait]
pub trait Collaborators: Send + Sync {
    async fn create_notification(
        &self,
        club_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<(), String>;

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;

    async fn create_task(
        &self,
        club_id: Uuid,
        title: &str,
        description: Option<&str>,
        priority: &str,
        due_in_days: i64,
    ) -> Result<(), String>;

    async fn update_status(
        &self,
        club_id: Uuid,
        entity: &str,
        entity_id: Uuid,
        status: &str,
    ) -> Result<(), String>;

    async fn record_activity(
        &self,
        club_id: Uuid,
        activity_type: &str,
        description: &str,
    ) -> Result<(), String>;

    /// Returns the response status code on success.
    async fn post_webhook(
        &self,
        method: &str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<u16, String>;

    /// Most recent club data for manual test runs, if any exists.
    async fn representative_context(&self, club_id: Uuid) -> Option<RuntimeContext>;
}

fn str_field<'a>(config: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    config.get(name).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

fn num_field(config: &serde_json::Value, name: &str) -> Option<i64> {
    match config.get(name) {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Dispatches one resolved step config to the matching collaborator call.
#[derive(Clone)]
pub struct ActionRunner {
    collaborators: Arc<dyn Collaborators>,
}

impl ActionRunner {
    pub fn new(collaborators: Arc<dyn Collaborators>) -> Self {
        Self { collaborators }
    }

    pub fn collaborators(&self) -> &Arc<dyn Collaborators> {
        &self.collaborators
    }

    /// Run one non-control-flow step. `config` must already have its
    /// variables resolved. Returns a short human-readable summary.
    pub async fn run_step(
        &self,
        club_id: Uuid,
        kind: ActionKind,
        config: &serde_json::Value,
        context: &RuntimeContext,
    ) -> Result<String, String> {
        match kind {
            ActionKind::SendNotification => {
                let title = str_field(config, "titolo").ok_or("titolo mancante")?;
                let message = str_field(config, "messaggio").unwrap_or("");
                self.collaborators
                    .create_notification(club_id, title, message)
                    .await?;
                Ok(format!("Notifica inviata: {title}"))
            }
            ActionKind::SendEmail => {
                let to = str_field(config, "to").ok_or("destinatario mancante")?;
                let subject = str_field(config, "subject").ok_or("oggetto mancante")?;
                let body = str_field(config, "body").unwrap_or("");
                self.collaborators.send_email(to, subject, body).await?;
                Ok(format!("Email inviata a {to}"))
            }
            ActionKind::CreateTask => {
                let title = str_field(config, "titolo").ok_or("titolo mancante")?;
                let description = str_field(config, "descrizione");
                let priority = str_field(config, "priority").unwrap_or("medium");
                let due_in_days = num_field(config, "due_in_days").unwrap_or(0);
                self.collaborators
                    .create_task(club_id, title, description, priority, due_in_days)
                    .await?;
                Ok(format!("Attività creata: {title}"))
            }
            ActionKind::UpdateStatus => {
                let entity = str_field(config, "entity").ok_or("entità mancante")?;
                let status = str_field(config, "status").ok_or("stato mancante")?;
                // Configured id wins; without one, fall back to the entity's
                // own id in the run context.
                let entity_id = str_field(config, "entity_id")
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .or_else(|| {
                        context
                            .get(entity, "id")
                            .and_then(|v| v.as_str())
                            .and_then(|s| Uuid::parse_str(s).ok())
                    })
                    .ok_or_else(|| format!("nessun id '{entity}' nel contesto"))?;
                self.collaborators
                    .update_status(club_id, entity, entity_id, status)
                    .await?;
                Ok(format!("Stato di {entity} aggiornato a {status}"))
            }
            ActionKind::CreateActivity => {
                let activity_type = str_field(config, "activity_type").unwrap_or("system");
                let description = str_field(config, "descrizione").ok_or("descrizione mancante")?;
                self.collaborators
                    .record_activity(club_id, activity_type, description)
                    .await?;
                Ok("Attività registrata".to_string())
            }
            ActionKind::Webhook => {
                let url = str_field(config, "url").ok_or("URL mancante")?;
                let method = str_field(config, "method").unwrap_or("POST");
                let body = config.get("body").filter(|v| !v.is_null());
                let status = self.collaborators.post_webhook(method, url, body).await?;
                Ok(format!("Webhook {method} {url} -> {status}"))
            }
            // Control-flow kinds are handled by the executor loop.
            ActionKind::Delay | ActionKind::Condition => {
                Err(format!("'{}' non è un'azione eseguibile", kind.as_str()))
            }
        }
    }

    /// Evaluate a condition step's `field`/`operator`/`value` against the
    /// run context. A missing field or unknown operator evaluates false;
    /// an absent operator (pre-validation rows) means `equals`.
    pub fn evaluate_condition(config: &serde_json::Value, context: &RuntimeContext) -> bool {
        let Some(field) = str_field(config, "field") else {
            return false;
        };
        let operator = str_field(config, "operator").unwrap_or("equals");
        let expected = config
            .get("value")
            .map(value_as_string)
            .unwrap_or_default();

        let Some(actual_value) = context.lookup(field) else {
            return false;
        };
        let actual = value_as_string(actual_value);

        match operator {
            "equals" => actual == expected,
            "not_equals" => actual != expected,
            "contains" => actual.to_lowercase().contains(&expected.to_lowercase()),
            "greater_than" => compare_numeric(&actual, &expected, |a, b| a > b),
            "less_than" => compare_numeric(&actual, &expected, |a, b| a < b),
            other => {
                warn!(operator = other, "unknown condition operator");
                false
            }
        }
    }
}

fn value_as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_numeric(actual: &str, expected: &str, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => cmp(a, b),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Production implementation

pub struct PgCollaborators {
    pool: PgPool,
    email: Option<EmailService>,
    http: reqwest::Client,
}

impl PgCollaborators {
    pub fn new(pool: PgPool, email: Option<EmailService>, webhook_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(webhook_timeout)
            .build()
            .unwrap_or_default();
        Self { pool, email, http }
    }
}

#[async_trait]
impl Collaborators for PgCollaborators {
    async fn create_notification(
        &self,
        club_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<(), String> {
        sqlx::query(
            "INSERT INTO notifications (id, club_id, title, message, read, created_at) \
             VALUES ($1, $2, $3, $4, FALSE, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(club_id)
        .bind(title)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("notifica non creata: {e}"))?;
        Ok(())
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let email = self
            .email
            .as_ref()
            .ok_or("SMTP non configurato")?;
        email
            .send_email(to, None, subject, body, None)
            .await
            .map_err(|e| format!("invio email fallito: {e}"))
    }

    async fn create_task(
        &self,
        club_id: Uuid,
        title: &str,
        description: Option<&str>,
        priority: &str,
        due_in_days: i64,
    ) -> Result<(), String> {
        let due_date = (due_in_days > 0)
            .then(|| Utc::now() + chrono::Duration::days(due_in_days));
        sqlx::query(
            "INSERT INTO tasks (id, club_id, title, description, priority, due_date, completed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(club_id)
        .bind(title)
        .bind(description)
        .bind(priority)
        .bind(due_date)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("attività non creata: {e}"))?;
        Ok(())
    }

    async fn update_status(
        &self,
        club_id: Uuid,
        entity: &str,
        entity_id: Uuid,
        status: &str,
    ) -> Result<(), String> {
        // Entity names come from the closed select in the action catalog,
        // never from user text, so the table name match stays exhaustive.
        let query = match entity {
            "lead" => "UPDATE leads SET status = $3, updated_at = NOW() WHERE club_id = $1 AND id = $2",
            "sponsor" => "UPDATE sponsors SET status = $3, updated_at = NOW() WHERE club_id = $1 AND id = $2",
            "contract" => "UPDATE contracts SET status = $3, updated_at = NOW() WHERE club_id = $1 AND id = $2",
            other => return Err(format!("entità sconosciuta '{other}'")),
        };
        let result = sqlx::query(query)
            .bind(club_id)
            .bind(entity_id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(|e| format!("aggiornamento stato fallito: {e}"))?;
        if result.rows_affected() == 0 {
            return Err(format!("{entity} {entity_id} non trovato"));
        }
        Ok(())
    }

    async fn record_activity(
        &self,
        club_id: Uuid,
        activity_type: &str,
        description: &str,
    ) -> Result<(), String> {
        sqlx::query(
            "INSERT INTO activities (id, club_id, activity_type, description, created_at) \
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(club_id)
        .bind(activity_type)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(|e| format!("attività non registrata: {e}"))?;
        Ok(())
    }

    async fn post_webhook(
        &self,
        method: &str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<u16, String> {
        let request = match method {
            "GET" => self.http.get(url),
            "PUT" => self.http.put(url),
            _ => self.http.post(url),
        };
        let request = match body {
            Some(json) => request.json(json),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| format!("chiamata webhook fallita: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("webhook ha risposto {status}"));
        }
        Ok(status.as_u16())
    }

    async fn representative_context(&self, club_id: Uuid) -> Option<RuntimeContext> {
        let mut ctx = RuntimeContext::new();
        let mut found = false;

        let lead: Option<(Uuid, String, Option<String>, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT id, name, company, email, phone, status FROM leads \
                 WHERE club_id = $1 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(club_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();
        if let Some((id, name, company, email, phone, status)) = lead {
            found = true;
            ctx.insert_category(
                "lead",
                serde_json::json!({
                    "id": id.to_string(),
                    "nome": name,
                    "azienda": company,
                    "email": email,
                    "telefono": phone,
                    "status": status,
                }),
            );
        }

        let sponsor: Option<(Uuid, String, Option<String>, Option<String>, String, String)> =
            sqlx::query_as(
                "SELECT id, name, company, email, tier, status FROM sponsors \
                 WHERE club_id = $1 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(club_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();
        if let Some((id, name, company, email, tier, status)) = sponsor {
            found = true;
            ctx.insert_category(
                "sponsor",
                serde_json::json!({
                    "id": id.to_string(),
                    "nome": name,
                    "azienda": company,
                    "email": email,
                    "tier": tier,
                    "status": status,
                }),
            );
        }

        found.then(|| ctx.with_builtins(club_id))
    }
}
