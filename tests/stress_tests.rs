//! Stress tests: randomized interleavings of refresh, load-more, gap taps,
//! server-side publishing and partial draining against one controller.
//!
//! Every seed is replayable; a failing run prints its seed and step log.

mod common;

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use timeline_sync::feed::{FeedController, FeedOptions};
use timeline_sync::fetch::fetcher::FetcherOptions;
use timeline_sync::fetch::fixture::FixtureSource;
use timeline_sync::fetch::source::PageSource;
use timeline_sync::reconcile::has_adjacent_gaps;
use timeline_sync::timeline::cursor::{PaginationStyle, compare_ids};
use timeline_sync::timeline::entity::Status;
use timeline_sync::timeline::item::{Item, ItemKey};
use timeline_sync::timeline::view::{StatusViewData, status_view};

// ════════════════════════════════════════════════════════════════
// INFRASTRUCTURE
// ════════════════════════════════════════════════════════════════

/// Stress report emitted when a scenario fails.
struct StressReport {
    scenario: String,
    steps: Vec<String>,
}

impl StressReport {
    fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            steps: Vec::new(),
        }
    }

    fn step(&mut self, what: impl Into<String>) {
        self.steps.push(what.into());
    }

    fn emit(&self) -> String {
        let mut out = String::new();
        writeln!(out, "═══ Stress: {} ═══", self.scenario).unwrap();
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(out, "  {i:>3}: {step}").unwrap();
        }
        out
    }
}

type Feed = FeedController<Status, StatusViewData>;

/// Structural invariants that must hold between any two applied completions.
fn check_invariants(feed: &Feed, report: &StressReport) {
    let list = feed.list();
    assert!(
        !has_adjacent_gaps(list),
        "adjacent gaps\n{}",
        report.emit()
    );
    assert_eq!(list.views().len(), list.len(), "view/item length drift\n{}", report.emit());

    let ids: Vec<String> = list
        .keys()
        .into_iter()
        .filter_map(|key| match key {
            ItemKey::Real(id) => Some(id),
            ItemKey::Gap(_) => None,
        })
        .collect();
    for pair in ids.windows(2) {
        assert!(
            compare_ids(&pair[0], &pair[1]).is_gt(),
            "order broken at {} / {}\n{}",
            pair[0],
            pair[1],
            report.emit()
        );
    }
    for (item, view) in list.items().iter().zip(list.views()) {
        match (item, view) {
            (Item::Real(status), StatusViewData::Concrete(v)) => {
                assert_eq!(status.id, v.id, "stale view\n{}", report.emit());
            }
            (Item::Gap(gap), StatusViewData::Placeholder { id, loading }) => {
                assert_eq!(gap.id.raw(), *id, "stale placeholder\n{}", report.emit());
                assert_eq!(gap.loading, *loading, "stale loading flag\n{}", report.emit());
            }
            _ => panic!("view kind mismatch\n{}", report.emit()),
        }
    }
}

fn build(seed: u64, initial: u32, page_size: usize) -> (Arc<FixtureSource<Status>>, Feed) {
    let fixture = Arc::new(FixtureSource::new(
        common::statuses(1..=initial),
        PaginationStyle::ItemId,
    ));
    let source: Arc<dyn PageSource<Status>> = fixture.clone();
    let mut options = FeedOptions::new(format!("stress-{seed}"), PaginationStyle::ItemId);
    options.page_size = page_size;
    options.fetcher = FetcherOptions {
        worker_threads: 3,
        ..FetcherOptions::default()
    };
    let feed = FeedController::new(source, status_view, options).expect("controller");
    (fixture, feed)
}

fn idle_gap(feed: &Feed, rng: &mut StdRng) -> Option<timeline_sync::timeline::item::GapId> {
    let idle: Vec<_> = feed
        .list()
        .items()
        .iter()
        .filter_map(Item::as_gap)
        .filter(|gap| !gap.loading)
        .map(|gap| gap.id)
        .collect();
    if idle.is_empty() {
        None
    } else {
        Some(idle[rng.random_range(0..idle.len())])
    }
}

// ════════════════════════════════════════════════════════════════
// SCENARIOS
// ════════════════════════════════════════════════════════════════

#[test]
fn random_interleavings_keep_list_well_formed() {
    for seed in 0..24_u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let page_size = rng.random_range(2..7);
        let (fixture, mut feed) = build(seed, 40, page_size);
        let mut report = StressReport::new(&format!("seed {seed}, page size {page_size}"));
        let mut next_id = 1_000_u32;

        feed.start().expect("start");
        report.step("start");
        for _ in 0..80 {
            match rng.random_range(0..100) {
                0..=19 => {
                    let ticket = feed.refresh().expect("refresh");
                    report.step(format!("refresh -> {}", ticket.is_some()));
                }
                20..=39 => {
                    let ticket = feed.load_more().expect("load more");
                    report.step(format!("load_more -> {}", ticket.is_some()));
                }
                40..=59 => {
                    if let Some(gap) = idle_gap(&feed, &mut rng) {
                        let ticket = feed.load_gap(gap).expect("gap");
                        report.step(format!("load_gap {gap} -> {}", ticket.is_some()));
                    }
                }
                60..=69 => {
                    let burst = rng.random_range(1..=2 * page_size as u32);
                    fixture.publish((next_id..next_id + burst).map(common::status));
                    report.step(format!("publish {next_id}..{}", next_id + burst - 1));
                    next_id += burst;
                }
                70..=89 => {
                    let applied = feed.pump();
                    report.step(format!("pump -> {applied}"));
                }
                _ => {
                    let settled = feed.wait_settled(Duration::from_secs(5));
                    report.step(format!("settle -> {settled}"));
                    assert!(settled, "did not settle\n{}", report.emit());
                }
            }
            check_invariants(&feed, &report);
            if rng.random_bool(0.3) {
                std::thread::sleep(Duration::from_micros(200));
            }
        }

        assert!(feed.wait_settled(Duration::from_secs(5)), "{}", report.emit());
        check_invariants(&feed, &report);
        assert!(
            !feed.list().views().iter().any(StatusViewData::is_loading_placeholder),
            "loading placeholder left behind\n{}",
            report.emit()
        );

        // A final refresh always brings the newest published entry to the top.
        feed.refresh().expect("refresh");
        assert!(feed.wait_settled(Duration::from_secs(5)), "{}", report.emit());
        let newest = feed
            .list()
            .get(0)
            .and_then(Item::real_id)
            .map(str::to_string);
        let expected = if next_id > 1_000 {
            (next_id - 1).to_string()
        } else {
            "40".to_string()
        };
        assert_eq!(newest.as_deref(), Some(expected.as_str()), "{}", report.emit());
        feed.teardown();
    }
}

#[test]
fn resets_mid_flight_never_leak_stale_pages() {
    for seed in 100..116_u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (_fixture, mut feed) = build(seed, 30, 4);
        let mut report = StressReport::new(&format!("reset seed {seed}"));

        for round in 0..10 {
            feed.start().expect("start");
            report.step(format!("round {round}: start"));
            if rng.random_bool(0.5) {
                feed.pump();
            }
            feed.reset();
            report.step("reset");
            assert!(feed.list().is_empty(), "{}", report.emit());
            std::thread::sleep(Duration::from_micros(rng.random_range(0..500)));
            feed.pump();
            assert!(
                feed.list().is_empty(),
                "stale page applied after reset\n{}",
                report.emit()
            );
        }

        feed.start().expect("start");
        assert!(feed.wait_settled(Duration::from_secs(5)), "{}", report.emit());
        assert_eq!(feed.list().real_len(), 4, "{}", report.emit());
        check_invariants(&feed, &report);
        feed.teardown();
    }
}
