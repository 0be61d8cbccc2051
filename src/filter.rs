use crate::normalizer::CanonicalNames;
use crate::schema::NormalizedTable;
use std::collections::BTreeSet;

/// Keeps the detail rows matching both predicates.
///
/// An empty `channels` set accepts every channel and an empty `plans` set
/// every plan. Requested channels are canonical names; they are expanded to
/// their raw sheet labels and matched against each row's inherited channel,
/// so sub-plan rows follow their channel header.
pub fn filter_table(
    table: &NormalizedTable,
    names: &CanonicalNames,
    channels: &BTreeSet<String>,
    plans: &BTreeSet<String>,
) -> NormalizedTable {
    let raw_channels: Option<BTreeSet<String>> = (!channels.is_empty()).then(|| {
        channels
            .iter()
            .flat_map(|channel| names.raw_channel_labels(channel))
            .collect()
    });

    let rows = table
        .detail_rows()
        .filter(|row| {
            raw_channels
                .as_ref()
                .map_or(true, |raw| raw.contains(&row.inherited_channel))
        })
        .filter(|row| plans.is_empty() || plans.contains(&row.plan))
        .cloned()
        .collect();

    table.with_rows(rows)
}

/// Keeps detail rows whose plan is one of `plans`, regardless of channel.
pub fn filter_plans<'a, I>(table: &NormalizedTable, plans: I) -> NormalizedTable
where
    I: IntoIterator<Item = &'a String>,
{
    let plans: BTreeSet<&String> = plans.into_iter().collect();
    let rows = table
        .detail_rows()
        .filter(|row| plans.contains(&row.plan))
        .cloned()
        .collect();
    table.with_rows(rows)
}

/// Distinct canonical channels of the detail rows, for filter choice lists.
///
/// Rows inheriting an aggregate header still count in sums but do not name a
/// channel of their own.
pub fn channel_options(table: &NormalizedTable, names: &CanonicalNames) -> Vec<String> {
    table
        .detail_rows()
        .filter(|row| !names.is_aggregate_channel(&row.inherited_channel))
        .map(|row| row.channel.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct canonical plans of the detail rows, optionally within some channels.
pub fn plan_options(
    table: &NormalizedTable,
    names: &CanonicalNames,
    channels: &BTreeSet<String>,
) -> Vec<String> {
    filter_table(table, names, channels, &BTreeSet::new())
        .detail_rows()
        .filter(|row| !row.plan.is_empty())
        .map(|row| row.plan.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
