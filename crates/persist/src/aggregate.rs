use super::{Persistence, PersistorDefinition, Target};
use itertools::Itertools;
use row::{naming, AggregateRole};

/// Build the statement copying the shadow table `temporary` into `target`,
/// collapsing rows by the definition's keys.
///
/// Aggregating roles are computed in a grouped sub-select `a`. The shadow
/// table is then joined twice: as `p` on the latest surrogate key of the
/// group (for `last` and roleless columns) and as `k` on the earliest (for `first`).
pub fn merge_sql(
    persistence: &Persistence,
    definition: &PersistorDefinition,
    target: &Target,
    temporary: &Target,
) -> String {
    let esc = |name: &str| persistence.escape(name);
    let shadow = persistence.table_name(temporary);
    let key = esc(naming::INTERNAL_KEY);
    let max_id = esc(&naming::internal("maxID"));
    let min_id = esc(&naming::internal("minID"));

    let keys: Vec<String> = definition.keys().map(|c| esc(&c.name)).collect();

    let mut grouped = keys.clone();
    let mut selected = Vec::with_capacity(definition.columns.len());

    for column in &definition.columns {
        let name = esc(&column.name);
        let expr = match column.aggregate {
            AggregateRole::Key => format!("a.{name}"),
            AggregateRole::First => format!("k.{name}"),
            AggregateRole::Last | AggregateRole::None => format!("p.{name}"),
            role => {
                let alias = esc(&naming::internal(&column.name));
                // Aggregating roles always carry their SQL function.
                let function = role.sql_function().unwrap_or("max");
                grouped.push(format!("{function}({name}) AS {alias}"));
                format!("a.{alias}")
            }
        };
        selected.push(expr);
    }
    grouped.push(format!("max({key}) AS {max_id}"));
    grouped.push(format!("min({key}) AS {min_id}"));

    format!(
        "INSERT INTO {table} ({columns}) SELECT {selected} FROM (SELECT {grouped} FROM {shadow} GROUP BY {keys}) a \
         INNER JOIN {shadow} p ON a.{max_id} = p.{key} \
         INNER JOIN {shadow} k ON a.{min_id} = k.{key}",
        table = persistence.table_name(target),
        columns = definition.columns.iter().map(|c| esc(&c.name)).join(", "),
        selected = selected.join(", "),
        grouped = grouped.join(", "),
        keys = keys.join(", "),
    )
}
