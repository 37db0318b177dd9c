use crate::output::{print_json, print_table};
use rover_core::action::ActionKind;
use rover_core::registry::ActionRegistry;
use serde::Serialize;

#[derive(Serialize)]
struct ActionRow<'a> {
    name: &'a str,
    kind: ActionKind,
    description: &'a str,
    destructive: bool,
}

pub fn run(registry: &ActionRegistry, json: bool) -> anyhow::Result<()> {
    let rows: Vec<ActionRow> = registry
        .iter()
        .map(|a| ActionRow {
            name: a.name(),
            kind: a.kind(),
            description: a.description(),
            destructive: a.is_destructive(),
        })
        .collect();

    if json {
        return print_json(&rows);
    }

    print_table(
        &["ACTION", "KIND", "DESCRIPTION"],
        rows.iter()
            .map(|r| {
                vec![
                    r.name.to_string(),
                    r.kind.to_string(),
                    r.description.to_string(),
                ]
            })
            .collect(),
    );
    if let Some(source) = registry.source() {
        println!();
        println!("custom actions from {}", source.display());
    }
    Ok(())
}
