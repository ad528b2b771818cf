use crate::block::Block;
use crate::trial::Trial;
use std::collections::BTreeMap;

/// Renders a block's generated trials as an aligned text table. `number` is the
/// block's 1-based position in the session.
pub fn block_to_string(block: &Block, trials: &[Trial], number: usize) -> String {
    let widths = column_widths(block);
    let names = block.factors();
    let practice = if block.practice() { ", practice" } else { "" };

    let mut out = Vec::with_capacity(trials.len() + 4);
    out.push(format!(
        "\n=== Block {} ({} trials{}) ===\n",
        number,
        trials.len(),
        practice
    ));
    out.push(row(&names, &widths, |name| name.to_string()));
    out.push(row(&names, &widths, |name| "-".repeat(widths[name])));
    for trial in trials {
        out.push(row(&names, &widths, |name| {
            trial.get(name).map(|v| v.to_string()).unwrap_or_default()
        }));
    }
    out.push(String::new());
    out.join("\n")
}

/// Width per factor: the longest of the factor name and every declared level,
/// whether or not it was drawn.
fn column_widths(block: &Block) -> BTreeMap<&str, usize> {
    block
        .factor_set()
        .factors()
        .iter()
        .map(|factor| {
            let widest_level = factor
                .levels()
                .iter()
                .map(|l| l.value.to_string().chars().count())
                .max()
                .unwrap_or(0);
            (factor.name(), widest_level.max(factor.name().chars().count()))
        })
        .collect()
}

fn row<F>(names: &[&str], widths: &BTreeMap<&str, usize>, cell: F) -> String
where
    F: Fn(&str) -> String,
{
    names
        .iter()
        .map(|name| format!("{:<width$}", cell(name), width = widths[name]))
        .collect::<Vec<_>>()
        .join(" ")
}
