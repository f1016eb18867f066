// Definition validation - runs before insert/update and before enabling

use crate::error::{AppError, ValidationBuilder};

use super::model::AutomationDefinition;
use super::registry::{self, ConfigField, FieldType};
use super::triggers;

fn check_fields(
    builder: ValidationBuilder,
    prefix: &str,
    fields: &[ConfigField],
    config: &serde_json::Value,
) -> ValidationBuilder {
    let mut builder = builder;

    for field in fields {
        let path = format!("{prefix}.{}", field.name);
        let value = config.get(field.name);

        let present = match value {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };

        if field.required && !present {
            builder = builder.error(&path, "Campo obbligatorio");
            continue;
        }
        if !present {
            continue;
        }

        match field.field_type {
            FieldType::Number => {
                let numeric = match value {
                    Some(serde_json::Value::Number(_)) => true,
                    Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().is_ok(),
                    _ => false,
                };
                if !numeric {
                    builder = builder.error(&path, "Deve essere un numero");
                }
            }
            FieldType::Select => {
                if let (Some(options), Some(serde_json::Value::String(s))) = (field.options, value)
                {
                    if !options.contains(&s.as_str()) {
                        builder = builder.error(&path, "Valore non ammesso");
                    }
                }
            }
            FieldType::Text | FieldType::Textarea => {}
        }
    }

    builder
}

/// Validate a definition as submitted over the API. Returns the full set of
/// field errors at once rather than failing on the first.
pub fn validate(definition: &AutomationDefinition) -> Result<(), AppError> {
    let mut builder = ValidationBuilder::new();

    if definition.name.trim().is_empty() {
        builder = builder.error("nome", "Il nome è obbligatorio");
    }

    match definition.trigger_type {
        Some(kind) => {
            let descriptor = triggers::get_trigger(kind);
            builder = check_fields(
                builder,
                "trigger_config",
                &descriptor.config_fields,
                &definition.trigger_config,
            );

            // A cron expression has to at least have the right shape; full
            // parsing happens when the job is registered.
            if kind == triggers::TriggerKind::Cron {
                if let Some(expr) = definition
                    .trigger_config
                    .get("expression")
                    .and_then(|v| v.as_str())
                {
                    let fields = expr.split_whitespace().count();
                    if !expr.trim().is_empty() && !(5..=6).contains(&fields) {
                        builder = builder
                            .error("trigger_config.expression", "Espressione cron non valida");
                    }
                }
            }
        }
        None => {
            if definition.enabled {
                builder = builder.error(
                    "trigger_type",
                    "Un'automazione attiva deve avere un trigger",
                );
            }
        }
    }

    for (index, step) in definition.steps.iter().enumerate() {
        let prefix = format!("steps[{index}]");

        if step.delay_minutes < 0 {
            builder = builder.error(
                &format!("{prefix}.delay_minutes"),
                "Il ritardo non può essere negativo",
            );
        }

        let descriptor = registry::get_action(step.kind);
        builder = check_fields(
            builder,
            &format!("{prefix}.config"),
            &descriptor.config_fields,
            &step.config,
        );
    }

    match builder.build() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
