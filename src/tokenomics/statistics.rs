//! Cross-validation of channel and storage usage reports.
//!
//! A channel reports how many views of each file it fetched from each
//! storage node; the storage node reports how many it served to each
//! channel. Only counts both sides agree on, within the tolerance factor,
//! earn rewards, so a single lying party cannot inflate its own payout.

use std::collections::{BTreeMap, BTreeSet};

use super::distribution::{to_weights, RewardWeight};
use super::RewardError;
use crate::crypto::Hash;
use crate::documents::DocumentRegistry;
use crate::params::{STAT_TOLERANCE_DENOMINATOR, STAT_TOLERANCE_NUMERATOR};
use crate::types::{Action, Address, Id, ServiceStatistics, SignedTransaction};

/// `(channel, unit, file, storage)`
type Triple = (Address, Id, Id, Address);

/// Reward weights restricted to one content unit
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitWeights {
    /// Author shares
    pub authors: Vec<RewardWeight>,
    /// Channel shares
    pub channels: Vec<RewardWeight>,
    /// Storage shares
    pub storages: Vec<RewardWeight>,
}

/// Everything the reward engine derives from one block's reports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatisticsOutcome {
    /// Author shares over all units
    pub authors: Vec<RewardWeight>,
    /// Channel shares over all units
    pub channels: Vec<RewardWeight>,
    /// Storage shares over all units
    pub storages: Vec<RewardWeight>,
    /// Verified views per unit
    pub unit_view_counts: BTreeMap<Id, u64>,
    /// Shares per unit, used for sponsorship payouts
    pub units: BTreeMap<Id, UnitWeights>,
}

fn collect_counts<F>(reports: &[&ServiceStatistics], key: F) -> BTreeMap<Triple, u64>
where
    F: Fn(&Address, &Id, &Id, &Address) -> Triple,
{
    let mut counts = BTreeMap::new();
    for report in reports {
        for file in &report.file_items {
            for item in &file.count_items {
                let triple = key(&report.server_address, &file.unit_uri, &file.file_uri, &item.peer_address);
                let entry: &mut u64 = counts.entry(triple).or_default();
                *entry = entry.saturating_add(item.count);
            }
        }
    }
    counts
}

/// Whether two reported counts agree within the tolerance factor
#[must_use]
pub fn counts_agree(a: u64, b: u64) -> bool {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    low > 0
        && u128::from(high) * u128::from(STAT_TOLERANCE_DENOMINATOR)
            <= u128::from(low) * u128::from(STAT_TOLERANCE_NUMERATOR)
}

/// Counts confirmed by both sides, keyed by `(channel, unit, file, storage)`
#[must_use]
pub fn cross_verify(
    channel_reports: &[&ServiceStatistics],
    storage_reports: &[&ServiceStatistics],
) -> BTreeMap<Triple, u64> {
    let from_channels = collect_counts(channel_reports, |channel, unit, file, storage| {
        (*channel, *unit, *file, *storage)
    });
    let from_storages = collect_counts(storage_reports, |storage, unit, file, channel| {
        (*channel, *unit, *file, *storage)
    });
    from_channels
        .into_iter()
        .filter_map(|(triple, channel_count)| {
            let storage_count = *from_storages.get(&triple)?;
            counts_agree(channel_count, storage_count)
                .then(|| (triple, channel_count.min(storage_count)))
        })
        .collect()
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn add_weight(map: &mut BTreeMap<Address, u128>, to: Address, amount: u128) -> Result<(), RewardError> {
    let entry = map.entry(to).or_default();
    *entry = entry.checked_add(amount).ok_or(RewardError::Overflow)?;
    Ok(())
}

/// Derive reward weights from one block's reports.
///
/// - storage weight: total verified views served
/// - author weight: per unit, each viewed file's views split evenly over
///   its authors and averaged over the unit's viewed files
/// - channel weight: per unit and serving channel, the views of the unit's
///   most viewed file; credited to the unit's owner channel and, when
///   different, to the serving channel
///
/// Author shares are scaled by the least common multiple of all divisors
/// so every share stays an exact integer numerator.
///
/// # Errors
/// Returns error on arithmetic overflow
pub fn validate_statistics(
    channel_reports: &[&ServiceStatistics],
    storage_reports: &[&ServiceStatistics],
    documents: &DocumentRegistry,
) -> Result<StatisticsOutcome, RewardError> {
    let verified = cross_verify(channel_reports, storage_reports);

    let mut storages: BTreeMap<Address, u128> = BTreeMap::new();
    let mut unit_storages: BTreeMap<Id, BTreeMap<Address, u128>> = BTreeMap::new();
    let mut file_views: BTreeMap<(Address, Id, Id), u64> = BTreeMap::new();
    for (&(channel, unit, file, storage), &count) in &verified {
        add_weight(&mut storages, storage, u128::from(count))?;
        add_weight(unit_storages.entry(unit).or_default(), storage, u128::from(count))?;
        let views = file_views.entry((channel, unit, file)).or_default();
        *views = views.saturating_add(count);
    }

    // most viewed file per (channel, unit), and total views per (unit, file)
    let mut channel_unit_views: BTreeMap<(Address, Id), u64> = BTreeMap::new();
    let mut unit_file_views: BTreeMap<Id, BTreeMap<Id, u64>> = BTreeMap::new();
    for (&(channel, unit, file), &views) in &file_views {
        let best = channel_unit_views.entry((channel, unit)).or_default();
        *best = (*best).max(views);
        let total = unit_file_views.entry(unit).or_default().entry(file).or_default();
        *total = total.saturating_add(views);
    }

    let mut unit_view_counts: BTreeMap<Id, u64> = BTreeMap::new();
    let mut channels: BTreeMap<Address, u128> = BTreeMap::new();
    let mut unit_channels: BTreeMap<Id, BTreeMap<Address, u128>> = BTreeMap::new();
    for (&(channel, unit), &views) in &channel_unit_views {
        let count = unit_view_counts.entry(unit).or_default();
        *count = count.saturating_add(views);

        let per_unit = unit_channels.entry(unit).or_default();
        let owner = documents.unit(&unit).map_or(channel, |record| record.channel);
        add_weight(&mut channels, owner, u128::from(views))?;
        add_weight(per_unit, owner, u128::from(views))?;
        if owner != channel {
            add_weight(&mut channels, channel, u128::from(views))?;
            add_weight(per_unit, channel, u128::from(views))?;
        }
    }

    // every author of file f in unit u gets views(u, f) / (|authors(f)| * files(u))
    let mut divisors: Vec<(Id, u64, Vec<Address>, u128)> = Vec::new();
    for (unit, files) in &unit_file_views {
        let viewed_files = files.len() as u128;
        for (file, views) in files {
            let Some(record) = documents.file(file) else {
                continue;
            };
            if record.authors.is_empty() {
                continue;
            }
            let divisor = (record.authors.len() as u128)
                .checked_mul(viewed_files)
                .ok_or(RewardError::Overflow)?;
            divisors.push((*unit, *views, record.authors.clone(), divisor));
        }
    }
    let mut common = 1u128;
    for (_, _, _, divisor) in &divisors {
        common = (common / gcd(common, *divisor))
            .checked_mul(*divisor)
            .ok_or(RewardError::Overflow)?;
    }
    let mut authors: BTreeMap<Address, u128> = BTreeMap::new();
    let mut unit_authors: BTreeMap<Id, BTreeMap<Address, u128>> = BTreeMap::new();
    for (unit, views, file_authors, divisor) in divisors {
        let share = u128::from(views)
            .checked_mul(common / divisor)
            .ok_or(RewardError::Overflow)?;
        let per_unit = unit_authors.entry(unit).or_default();
        for author in file_authors {
            add_weight(&mut authors, author, share)?;
            add_weight(per_unit, author, share)?;
        }
    }

    let units = unit_view_counts
        .keys()
        .map(|unit| {
            let weights = UnitWeights {
                authors: unit_authors.get(unit).map(to_weights).unwrap_or_default(),
                channels: unit_channels.get(unit).map(to_weights).unwrap_or_default(),
                storages: unit_storages.get(unit).map(to_weights).unwrap_or_default(),
            };
            (*unit, weights)
        })
        .collect();

    Ok(StatisticsOutcome {
        authors: to_weights(&authors),
        channels: to_weights(&channels),
        storages: to_weights(&storages),
        unit_view_counts,
        units,
    })
}

/// Whether a block carries at least half of the statistics this node knows
/// to be eligible for it
#[must_use]
pub fn check_service_statistics(
    signed_transactions: &[SignedTransaction],
    eligible: &BTreeSet<Hash>,
) -> bool {
    let included = signed_transactions
        .iter()
        .filter(|tx| matches!(tx.transaction.action, Action::ServiceStatistics(_)))
        .filter_map(|tx| tx.hash().ok())
        .filter(|hash| eligible.contains(hash))
        .count();
    included * 2 >= eligible.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;
    use crate::documents::{FileRecord, UnitRecord};
    use crate::types::{ServiceStatisticsCount, ServiceStatisticsFile};

    fn address(n: u8) -> Address {
        Address::from_bytes([n; 32])
    }

    fn report(server: Address, peer: Address, unit: Id, file: Id, count: u64) -> ServiceStatistics {
        ServiceStatistics {
            server_address: server,
            block_number: 1,
            file_items: vec![ServiceStatisticsFile {
                file_uri: file,
                unit_uri: unit,
                count_items: vec![ServiceStatisticsCount {
                    peer_address: peer,
                    count,
                }],
            }],
        }
    }

    #[test]
    fn test_tolerance_excludes_large_disagreement() {
        let (channel, storage) = (address(1), address(2));
        let (unit, file) = (hash_data(b"unit"), hash_data(b"file"));

        let c = report(channel, storage, unit, file, 100);
        let s = report(storage, channel, unit, file, 150);
        assert!(cross_verify(&[&c], &[&s]).is_empty());

        let s = report(storage, channel, unit, file, 110);
        let verified = cross_verify(&[&c], &[&s]);
        assert_eq!(verified.get(&(channel, unit, file, storage)), Some(&100));
    }

    #[test]
    fn test_one_sided_reports_ignored() {
        let c = report(address(1), address(2), hash_data(b"u"), hash_data(b"f"), 10);
        assert!(cross_verify(&[&c], &[]).is_empty());
        assert!(!counts_agree(0, 0));
    }

    fn registry() -> (DocumentRegistry, Id, Id, Id) {
        let mut documents = DocumentRegistry::default();
        let (f1, f2, unit) = (hash_data(b"f1"), hash_data(b"f2"), hash_data(b"unit"));
        documents
            .insert_file(FileRecord {
                uri: f1,
                authors: vec![address(10)],
            })
            .unwrap();
        documents
            .insert_file(FileRecord {
                uri: f2,
                authors: vec![address(10), address(11)],
            })
            .unwrap();
        documents
            .insert_unit(UnitRecord {
                uri: unit,
                content_id: 1,
                channel: address(20),
                authors: vec![address(10)],
                files: vec![f1, f2],
            })
            .unwrap();
        (documents, unit, f1, f2)
    }

    #[test]
    fn test_weights_follow_verified_views() {
        let (documents, unit, f1, f2) = registry();
        let (server, storage) = (address(21), address(30));
        let channel_reports = [
            report(server, storage, unit, f1, 40),
            report(server, storage, unit, f2, 20),
        ];
        let storage_reports = [
            report(storage, server, unit, f1, 40),
            report(storage, server, unit, f2, 20),
        ];
        let outcome = validate_statistics(
            &channel_reports.iter().collect::<Vec<_>>(),
            &storage_reports.iter().collect::<Vec<_>>(),
            &documents,
        )
        .unwrap();

        assert_eq!(outcome.unit_view_counts.get(&unit), Some(&40));
        assert_eq!(outcome.storages.len(), 1);
        assert_eq!(outcome.storages[0].numerator, 60);

        // f1: 40 / (1 * 2) to author 10; f2: 20 / (2 * 2) to authors 10 and 11
        let author = |a: Address| outcome.authors.iter().find(|w| w.to == a).copied().unwrap();
        let (ten, eleven) = (author(address(10)), author(address(11)));
        assert_eq!((ten.numerator, eleven.numerator), (100, 20));
        assert_eq!(ten.denominator, 120);

        // owner channel and serving channel both credited
        let channels: Vec<Address> = outcome.channels.iter().map(|w| w.to).collect();
        assert_eq!(channels, vec![address(20), address(21)]);
        assert!(outcome.units.contains_key(&unit));
    }

    #[test]
    fn test_service_statistics_inclusion_threshold() {
        let eligible: BTreeSet<Hash> = (0u8..4).map(|n| hash_data(&[n])).collect();
        assert!(!check_service_statistics(&[], &eligible));
        assert!(check_service_statistics(&[], &BTreeSet::new()));
    }
}
