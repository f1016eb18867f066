// Trigger registry - event and schedule kinds that can start an automation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::ConfigField;

/// Event or schedule kinds that can start an automation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    // Lead lifecycle
    LeadCreated,
    LeadStatusChanged,
    LeadConverted,

    // Sponsor lifecycle
    SponsorCreated,
    SponsorActivated,

    // Contract lifecycle
    ContractCreated,
    ContractExpiring,
    ContractExpired,

    // Club calendar
    MatchCreated,
    MatchStarting,
    EventCreated,
    EventRegistration,

    // Finance
    BudgetThreshold,
    PaymentOverdue,

    // Messaging
    MessageReceived,

    // Time-based
    Cron,
    Interval,
    SpecificDate,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 18] = [
        TriggerKind::LeadCreated,
        TriggerKind::LeadStatusChanged,
        TriggerKind::LeadConverted,
        TriggerKind::SponsorCreated,
        TriggerKind::SponsorActivated,
        TriggerKind::ContractCreated,
        TriggerKind::ContractExpiring,
        TriggerKind::ContractExpired,
        TriggerKind::MatchCreated,
        TriggerKind::MatchStarting,
        TriggerKind::EventCreated,
        TriggerKind::EventRegistration,
        TriggerKind::BudgetThreshold,
        TriggerKind::PaymentOverdue,
        TriggerKind::MessageReceived,
        TriggerKind::Cron,
        TriggerKind::Interval,
        TriggerKind::SpecificDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadCreated => "lead_created",
            Self::LeadStatusChanged => "lead_status_changed",
            Self::LeadConverted => "lead_converted",
            Self::SponsorCreated => "sponsor_created",
            Self::SponsorActivated => "sponsor_activated",
            Self::ContractCreated => "contract_created",
            Self::ContractExpiring => "contract_expiring",
            Self::ContractExpired => "contract_expired",
            Self::MatchCreated => "match_created",
            Self::MatchStarting => "match_starting",
            Self::EventCreated => "event_created",
            Self::EventRegistration => "event_registration",
            Self::BudgetThreshold => "budget_threshold",
            Self::PaymentOverdue => "payment_overdue",
            Self::MessageReceived => "message_received",
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::SpecificDate => "specific_date",
        }
    }

    /// Time-based kinds fire from the scheduler, never from domain events.
    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::Cron | Self::Interval | Self::SpecificDate)
    }

    /// Context category this trigger guarantees to a run, if any.
    pub fn required_category(&self) -> Option<&'static str> {
        match self {
            Self::LeadCreated | Self::LeadStatusChanged | Self::LeadConverted => Some("lead"),
            Self::SponsorCreated | Self::SponsorActivated => Some("sponsor"),
            Self::ContractCreated | Self::ContractExpiring | Self::ContractExpired => {
                Some("contract")
            }
            Self::PaymentOverdue => Some("contract"),
            _ => None,
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown trigger type '{s}'"))
    }
}

/// Descriptor served to the builder UI for one trigger kind.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerDescriptor {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    pub label: &'static str,
    pub config_fields: Vec<ConfigField>,
}

const LEAD_STATUSES: &[&str] = &["new", "contacted", "qualified", "negotiating", "won", "lost"];
const MESSAGE_CHANNELS: &[&str] = &["whatsapp", "email", "portal"];

fn descriptor(kind: TriggerKind) -> TriggerDescriptor {
    let (label, config_fields) = match kind {
        TriggerKind::LeadCreated => ("Lead creato", vec![]),
        TriggerKind::LeadStatusChanged => (
            "Stato lead cambiato",
            vec![
                ConfigField::select("status_from", "Da stato", LEAD_STATUSES),
                ConfigField::select("status_to", "A stato", LEAD_STATUSES),
            ],
        ),
        TriggerKind::LeadConverted => ("Lead convertito", vec![]),
        TriggerKind::SponsorCreated => ("Sponsor creato", vec![]),
        TriggerKind::SponsorActivated => ("Sponsor attivato", vec![]),
        TriggerKind::ContractCreated => ("Contratto creato", vec![]),
        TriggerKind::ContractExpiring => (
            "Contratto in scadenza",
            vec![ConfigField::number("days_before", "Giorni prima")
                .help("Quanti giorni prima della scadenza")],
        ),
        TriggerKind::ContractExpired => ("Contratto scaduto", vec![]),
        TriggerKind::MatchCreated => ("Partita creata", vec![]),
        TriggerKind::MatchStarting => (
            "Partita in avvio",
            vec![ConfigField::number("hours_before", "Ore prima")],
        ),
        TriggerKind::EventCreated => ("Evento creato", vec![]),
        TriggerKind::EventRegistration => ("Iscrizione a evento", vec![]),
        TriggerKind::BudgetThreshold => (
            "Soglia budget superata",
            vec![ConfigField::number("threshold", "Soglia").required()],
        ),
        TriggerKind::PaymentOverdue => (
            "Pagamento in ritardo",
            vec![ConfigField::number("days_overdue", "Giorni di ritardo")],
        ),
        TriggerKind::MessageReceived => (
            "Messaggio ricevuto",
            vec![ConfigField::select("channel", "Canale", MESSAGE_CHANNELS)],
        ),
        TriggerKind::Cron => (
            "Pianificazione cron",
            vec![ConfigField::text("expression", "Espressione cron")
                .required()
                .placeholder("0 0 9 * * MON")
                .help("Secondi minuti ore giorno mese giorno-settimana")],
        ),
        TriggerKind::Interval => (
            "Intervallo",
            vec![ConfigField::number("interval_minutes", "Minuti").required()],
        ),
        TriggerKind::SpecificDate => (
            "Data specifica",
            vec![ConfigField::text("run_at", "Data e ora")
                .required()
                .placeholder("2026-09-01T09:00:00Z")],
        ),
    };

    TriggerDescriptor {
        kind,
        label,
        config_fields,
    }
}

pub fn list_triggers() -> Vec<TriggerDescriptor> {
    TriggerKind::ALL.iter().map(|k| descriptor(*k)).collect()
}

pub fn get_trigger(kind: TriggerKind) -> TriggerDescriptor {
    descriptor(kind)
}

/// A domain event delivered to the dispatcher. The payload carries one JSON
/// object per context category (e.g. a `lead` object for lead events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub kind: TriggerKind,
    pub club_id: Uuid,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: TriggerKind, club_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            club_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn lead_created(club_id: Uuid, lead: serde_json::Value) -> Self {
        Self::new(TriggerKind::LeadCreated, club_id, serde_json::json!({ "lead": lead }))
    }

    pub fn lead_status_changed(
        club_id: Uuid,
        lead: serde_json::Value,
        status_from: &str,
        status_to: &str,
    ) -> Self {
        Self::new(
            TriggerKind::LeadStatusChanged,
            club_id,
            serde_json::json!({
                "lead": lead,
                "status_from": status_from,
                "status_to": status_to,
            }),
        )
    }

    pub fn sponsor_activated(club_id: Uuid, sponsor: serde_json::Value) -> Self {
        Self::new(
            TriggerKind::SponsorActivated,
            club_id,
            serde_json::json!({ "sponsor": sponsor }),
        )
    }

    pub fn contract_expiring(
        club_id: Uuid,
        contract: serde_json::Value,
        days_before: i64,
    ) -> Self {
        Self::new(
            TriggerKind::ContractExpiring,
            club_id,
            serde_json::json!({
                "contract": contract,
                "days_before": days_before,
            }),
        )
    }

    pub fn message_received(
        club_id: Uuid,
        channel: &str,
        from: &str,
        body_preview: &str,
    ) -> Self {
        Self::new(
            TriggerKind::MessageReceived,
            club_id,
            serde_json::json!({
                "channel": channel,
                "message": { "from": from, "body_preview": body_preview },
            }),
        )
    }
}
