//! Scenario Benchmarks
//!
//! - GMF sampling: streaming vs bulk, with and without spatial correlation
//! - Rupture/site filtering over point sources
//! - Damage map-reduce on the inline and rayon executors

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use scenario_shake::config::GmfMode;
use scenario_shake::exposure::Asset;
use scenario_shake::filters::gen_ruptures;
use scenario_shake::riskmodel::{FragilityFunction, FragilityModel, RiskModelSpec};
use scenario_shake::{
    calc_gmfs, run_scenario, GsimRegistry, Imt, InlineExecutor, Location, Monitor, PointSource, RayonExecutor,
    Rupture, ScenarioConfig, ScenarioInputs, SeismicSource, Site, SiteCollection, TaskExecutor,
};

/// Square grid of sites around the origin, 0.02° apart
fn create_sites(n: usize) -> SiteCollection {
    let side = (n as f64).sqrt().ceil() as usize;
    let sites = (0..n)
        .map(|i| {
            let lon = (i % side) as f64 * 0.02 - 0.5;
            let lat = (i / side) as f64 * 0.02 - 0.5;
            Site::new(i as u32, lon, lat).with_vs30(300.0 + (i % 7) as f64 * 100.0)
        })
        .collect();
    SiteCollection::new(sites).unwrap()
}

fn create_inputs(n_sites: usize) -> ScenarioInputs {
    let sites = create_sites(n_sites);
    let assets = sites
        .iter()
        .flat_map(|s| {
            (0..3).map(move |k| {
                let taxonomy = if k % 2 == 0 { "RC" } else { "WOOD" };
                Asset::new(format!("a{}-{}", s.id, k), taxonomy, 1.0 + k as f64, s.id)
            })
        })
        .collect();
    let f = |shift: f64| {
        FragilityFunction::new(
            Imt::Pga,
            vec![0.05 * shift, 0.2 * shift, 0.8 * shift],
            vec![vec![0.3, 0.7, 0.95], vec![0.05, 0.3, 0.7]],
        )
        .unwrap()
    };
    let model = FragilityModel::new(vec!["none".into(), "moderate".into(), "complete".into()])
        .with_function("RC", f(1.0))
        .with_function("WOOD", f(0.7));
    ScenarioInputs::new(
        sites,
        assets,
        Rupture::point(6.8, 90.0, Location::with_depth(0.0, 0.0, 10.0)).unwrap(),
        Some(RiskModelSpec::Fragility(model)),
    )
}

fn bench_gmfs(c: &mut Criterion) {
    let mut group = c.benchmark_group("gmf_sampling");
    let registry = GsimRegistry::builtin();
    let monitor = Monitor::new("bench");
    let rupture = Rupture::point(6.8, 90.0, Location::with_depth(0.0, 0.0, 10.0)).unwrap();

    for n_sites in [100usize, 400] {
        let sites = create_sites(n_sites);
        let base = ScenarioConfig::new("scenario_damage", 200.0, vec!["PGA", "SA(1.0)"], "LinearAttenuation")
            .number_of_ground_motion_fields(50);

        for (label, config) in [
            ("streaming", base.clone()),
            ("bulk", base.clone().gmf_mode(GmfMode::Bulk)),
            ("streaming_jb2009", base.clone().correlation_model("JB2009", false)),
        ] {
            group.bench_with_input(BenchmarkId::new(label, n_sites), &sites, |b, sites| {
                b.iter(|| black_box(calc_gmfs(&config, sites, &rupture, &registry, &monitor).unwrap()))
            });
        }
    }
    group.finish();
}

fn bench_filtering(c: &mut Criterion) {
    let mut group = c.benchmark_group("rupture_filtering");
    let sites = create_sites(2500);
    let monitor = Monitor::new("bench");

    for n_sources in [10usize, 100] {
        let sources: Vec<Arc<dyn SeismicSource>> = (0..n_sources)
            .map(|i| {
                let loc = Location::new((i % 10) as f64 * 0.5 - 2.5, (i / 10) as f64 * 0.5 - 2.5);
                Arc::new(PointSource::new(format!("src-{}", i), loc, vec![5.0, 5.5, 6.0, 6.5]))
                    as Arc<dyn SeismicSource>
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("gen_ruptures", n_sources), &sources, |b, sources| {
            b.iter(|| black_box(gen_ruptures(sources, &sites, 50.0, &monitor).count()))
        });
    }
    group.finish();
}

fn bench_map_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("damage_map_reduce");
    let registry = GsimRegistry::builtin();
    let monitor = Monitor::new("bench");
    let inputs = create_inputs(900);
    let pool = RayonExecutor::new(num_threads()).unwrap();
    let inline = InlineExecutor::new();

    for tasks in [1usize, 4, 16] {
        let config = ScenarioConfig::new("scenario_damage", 200.0, vec!["PGA"], "LinearAttenuation")
            .number_of_ground_motion_fields(20)
            .concurrent_tasks(tasks);
        for (label, executor) in [("inline", &inline as &dyn TaskExecutor), ("rayon", &pool)] {
            group.bench_with_input(BenchmarkId::new(label, tasks), &config, |b, config| {
                b.iter(|| black_box(run_scenario(config, &inputs, &registry, executor, &monitor).unwrap()))
            });
        }
    }
    group.finish();
}

fn num_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

criterion_group!(benches, bench_gmfs, bench_filtering, bench_map_reduce);
criterion_main!(benches);
