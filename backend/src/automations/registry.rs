// Action registry - the closed catalog of step kinds an automation can run

use serde::{Deserialize, Serialize};

/// The action kinds the platform supports. Closed set: adding one is a code
/// change, not a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendNotification,
    SendEmail,
    CreateTask,
    UpdateStatus,
    CreateActivity,
    Webhook,
    Delay,
    Condition,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::SendNotification,
        ActionKind::SendEmail,
        ActionKind::CreateTask,
        ActionKind::UpdateStatus,
        ActionKind::CreateActivity,
        ActionKind::Webhook,
        ActionKind::Delay,
        ActionKind::Condition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendNotification => "send_notification",
            Self::SendEmail => "send_email",
            Self::CreateTask => "create_task",
            Self::UpdateStatus => "update_status",
            Self::CreateActivity => "create_activity",
            Self::Webhook => "webhook",
            Self::Delay => "delay",
            Self::Condition => "condition",
        }
    }

    /// Whether a failure of this action aborts the remaining chain.
    /// Task creation and status updates mutate core business records, so a
    /// partial application must not be silently continued past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CreateTask | Self::UpdateStatus)
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown action type '{s}'"))
    }
}

/// Field type of a config field. Config payloads are validated against these
/// specs at the API boundary instead of being trusted as free-form JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Select,
}

/// One declared configuration field of an action or trigger.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigField {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'static [&'static str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<&'static str>,
}

impl ConfigField {
    const fn new(name: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            label,
            field_type,
            required: false,
            default: None,
            options: None,
            placeholder: None,
            help: None,
        }
    }

    pub const fn text(name: &'static str, label: &'static str) -> Self {
        Self::new(name, label, FieldType::Text)
    }

    pub const fn textarea(name: &'static str, label: &'static str) -> Self {
        Self::new(name, label, FieldType::Textarea)
    }

    pub const fn number(name: &'static str, label: &'static str) -> Self {
        Self::new(name, label, FieldType::Number)
    }

    pub const fn select(
        name: &'static str,
        label: &'static str,
        options: &'static [&'static str],
    ) -> Self {
        let mut f = Self::new(name, label, FieldType::Select);
        f.options = Some(options);
        f
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn placeholder(mut self, p: &'static str) -> Self {
        self.placeholder = Some(p);
        self
    }

    pub const fn help(mut self, h: &'static str) -> Self {
        self.help = Some(h);
        self
    }
}

/// Descriptor served to the builder UI for one action kind.
#[derive(Debug, Clone, Serialize)]
pub struct ActionDescriptor {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub label: &'static str,
    pub color: &'static str,
    pub fatal: bool,
    pub config_fields: Vec<ConfigField>,
}

const UPDATE_STATUS_ENTITIES: &[&str] = &["lead", "sponsor", "contract"];
const ACTIVITY_TYPES: &[&str] = &["call", "meeting", "email", "note", "system"];
const TASK_PRIORITIES: &[&str] = &["low", "medium", "high"];
const WEBHOOK_METHODS: &[&str] = &["POST", "PUT", "GET"];
const CONDITION_OPERATORS: &[&str] = &[
    "equals",
    "not_equals",
    "contains",
    "greater_than",
    "less_than",
];

fn descriptor(kind: ActionKind) -> ActionDescriptor {
    let (label, color, config_fields) = match kind {
        ActionKind::SendNotification => (
            "Invia notifica",
            "#3b82f6",
            vec![
                ConfigField::text("titolo", "Titolo")
                    .required()
                    .placeholder("Nuovo lead: {{lead.nome}}"),
                ConfigField::textarea("messaggio", "Messaggio")
                    .help("Supporta variabili {{categoria.campo}}"),
            ],
        ),
        ActionKind::SendEmail => (
            "Invia email",
            "#8b5cf6",
            vec![
                ConfigField::text("to", "Destinatario")
                    .required()
                    .placeholder("{{lead.email}}"),
                ConfigField::text("subject", "Oggetto").required(),
                ConfigField::textarea("body", "Corpo").required(),
            ],
        ),
        ActionKind::CreateTask => (
            "Crea attività",
            "#f59e0b",
            vec![
                ConfigField::text("titolo", "Titolo").required(),
                ConfigField::textarea("descrizione", "Descrizione"),
                ConfigField::select("priority", "Priorità", TASK_PRIORITIES),
                ConfigField::number("due_in_days", "Scadenza (giorni)"),
            ],
        ),
        ActionKind::UpdateStatus => (
            "Aggiorna stato",
            "#ef4444",
            vec![
                ConfigField::select("entity", "Entità", UPDATE_STATUS_ENTITIES).required(),
                ConfigField::text("entity_id", "ID entità")
                    .placeholder("{{lead.id}}")
                    .help("Vuoto: usa l'entità del contesto"),
                ConfigField::text("status", "Nuovo stato").required(),
            ],
        ),
        ActionKind::CreateActivity => (
            "Registra attività",
            "#10b981",
            vec![
                ConfigField::select("activity_type", "Tipo", ACTIVITY_TYPES),
                ConfigField::textarea("descrizione", "Descrizione").required(),
            ],
        ),
        ActionKind::Webhook => (
            "Webhook",
            "#6366f1",
            vec![
                ConfigField::text("url", "URL")
                    .required()
                    .placeholder("https://example.com/hook"),
                ConfigField::select("method", "Metodo", WEBHOOK_METHODS),
                ConfigField::textarea("body", "Payload JSON"),
            ],
        ),
        ActionKind::Delay => (
            "Attesa",
            "#64748b",
            vec![ConfigField::number("minutes", "Minuti")
                .required()
                .help("Estende l'attesa prima dello step successivo")],
        ),
        ActionKind::Condition => (
            "Condizione",
            "#eab308",
            vec![
                ConfigField::text("field", "Campo")
                    .required()
                    .placeholder("lead.status"),
                ConfigField::select("operator", "Operatore", CONDITION_OPERATORS).required(),
                ConfigField::text("value", "Valore").required(),
            ],
        ),
    };

    ActionDescriptor {
        kind,
        label,
        color,
        fatal: kind.is_fatal(),
        config_fields,
    }
}

/// Full catalog, in builder display order.
pub fn list_actions() -> Vec<ActionDescriptor> {
    ActionKind::ALL.iter().map(|k| descriptor(*k)).collect()
}

pub fn get_action(kind: ActionKind) -> ActionDescriptor {
    descriptor(kind)
}
