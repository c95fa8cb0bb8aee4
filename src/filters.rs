//! # Rupture/site filtering
//!
//! Table of Contents:
//! 1. SourceRuptureSites: one (source, rupture, affected sites) record
//! 2. gen_ruptures: lazy source → rupture → sites pipeline, and
//!    count_ruptures_in_range on top of it
//! 3. gen_ruptures_for_site: the same, grouped by source, for one site
//! 4. RuptureSiteDistanceFilter: reusable rupture-level filter
//!
//! Sources are filtered against their rough geometry before any rupture is
//! generated; ruptures are then filtered against the already reduced sites.
//! The three phases are timed by three independent monitors.

use std::borrow::Cow;
use std::iter::Peekable;
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::monitor::Monitor;
use crate::site::{Site, SiteCollection};
use crate::source::{Rupture, SeismicSource};

// ─────────────────────────────────────────────
// 1. SourceRuptureSites
// ─────────────────────────────────────────────

/// A rupture together with its source and the sites it can affect
#[derive(Debug, Clone)]
pub struct SourceRuptureSites<'a> {
    /// Originating source
    pub source: &'a dyn SeismicSource,
    /// Position of the source in the input sequence
    pub source_index: usize,
    /// The rupture
    pub rupture: Rupture,
    /// Sites within range of the rupture, in collection order
    pub sites: SiteCollection,
}

// ─────────────────────────────────────────────
// 2. gen_ruptures
// ─────────────────────────────────────────────

/// Lazily yield `(source, rupture, affected_sites)` for every rupture of
/// `sources` that has at least one site within `maximum_distance` km.
///
/// Order follows the source order, then rupture generation order.
pub fn gen_ruptures<'a>(
    sources: &'a [Arc<dyn SeismicSource>],
    sites: &'a SiteCollection,
    maximum_distance: f64,
    monitor: &Monitor,
) -> RuptureSiteIter<'a> {
    RuptureSiteIter::new(sources, Cow::Borrowed(sites), maximum_distance, monitor)
}

struct CurrentSource<'a> {
    source: &'a dyn SeismicSource,
    index: usize,
    sites: SiteCollection,
    ruptures: std::vec::IntoIter<Rupture>,
}

/// Iterator returned by [`gen_ruptures`]
pub struct RuptureSiteIter<'a> {
    sources: std::iter::Enumerate<std::slice::Iter<'a, Arc<dyn SeismicSource>>>,
    sites: Cow<'a, SiteCollection>,
    maximum_distance: f64,
    current: Option<CurrentSource<'a>>,
    filtering_sources: Monitor,
    generating_ruptures: Monitor,
    filtering_ruptures: Monitor,
}

impl<'a> RuptureSiteIter<'a> {
    fn new(
        sources: &'a [Arc<dyn SeismicSource>],
        sites: Cow<'a, SiteCollection>,
        maximum_distance: f64,
        monitor: &Monitor,
    ) -> Self {
        Self {
            sources: sources.iter().enumerate(),
            sites,
            maximum_distance,
            current: None,
            filtering_sources: monitor.copy("filtering sources"),
            generating_ruptures: monitor.copy("generating ruptures"),
            filtering_ruptures: monitor.copy("filtering ruptures"),
        }
    }

    /// Monitors for the three phases, in pipeline order
    pub fn monitors(&self) -> [&Monitor; 3] {
        [
            &self.filtering_sources,
            &self.generating_ruptures,
            &self.filtering_ruptures,
        ]
    }

    fn flush(&self) {
        self.filtering_sources.flush();
        self.generating_ruptures.flush();
        self.filtering_ruptures.flush();
    }
}

impl<'a> Iterator for RuptureSiteIter<'a> {
    type Item = Result<SourceRuptureSites<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let max_distance = self.maximum_distance;
        loop {
            if let Some(current) = &mut self.current {
                for rupture in current.ruptures.by_ref() {
                    let r_sites = self
                        .filtering_ruptures
                        .measure(|| filter_sites_by_distance_to_rupture(&rupture, max_distance, &current.sites));
                    if let Some(sites) = r_sites {
                        return Some(Ok(SourceRuptureSites {
                            source: current.source,
                            source_index: current.index,
                            rupture,
                            sites,
                        }));
                    }
                }
                self.current = None;
            }

            let Some((index, source)) = self.sources.next() else {
                self.flush();
                return None;
            };
            let source: &'a dyn SeismicSource = source.as_ref();

            let sites = &self.sites;
            let s_sites = match self
                .filtering_sources
                .measure(|| source.filter_sites_by_distance_to_source(max_distance, sites))
            {
                Ok(Some(s)) => s,
                Ok(None) => {
                    trace!(source_id = source.source_id(), "Source out of range");
                    continue;
                }
                Err(e) => return Some(Err(e)),
            };

            let ruptures = match self
                .generating_ruptures
                .measure(|| source.iter_ruptures().collect::<Result<Vec<_>>>())
            {
                Ok(r) if r.is_empty() => continue,
                Ok(r) => r,
                Err(e) => return Some(Err(e)),
            };

            self.current = Some(CurrentSource {
                source,
                index,
                sites: s_sites,
                ruptures: ruptures.into_iter(),
            });
        }
    }
}

impl Drop for RuptureSiteIter<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Number of ruptures of `sources` with at least one site within
/// `maximum_distance` km; the first source error is returned
pub fn count_ruptures_in_range(
    sources: &[Arc<dyn SeismicSource>],
    sites: &SiteCollection,
    maximum_distance: f64,
    monitor: &Monitor,
) -> Result<usize> {
    gen_ruptures(sources, sites, maximum_distance, monitor).try_fold(0, |n, item| item.map(|_| n + 1))
}

/// Sites within `maximum_distance` km of the rupture surface
pub fn filter_sites_by_distance_to_rupture(
    rupture: &Rupture,
    maximum_distance: f64,
    sites: &SiteCollection,
) -> Option<SiteCollection> {
    sites.filter_by_distance(rupture.surface().points(), maximum_distance)
}

// ─────────────────────────────────────────────
// 3. gen_ruptures_for_site
// ─────────────────────────────────────────────

/// Yield `(source, ruptures close to site)` for a single site, grouped by source
pub fn gen_ruptures_for_site<'a>(
    site: &Site,
    sources: &'a [Arc<dyn SeismicSource>],
    maximum_distance: f64,
    monitor: &Monitor,
) -> Result<SourceRuptures<'a>> {
    let sites = SiteCollection::new(vec![site.clone()])?;
    let inner = RuptureSiteIter::new(sources, Cow::Owned(sites), maximum_distance, monitor);
    Ok(SourceRuptures {
        inner: inner.peekable(),
    })
}

/// Iterator returned by [`gen_ruptures_for_site`]
pub struct SourceRuptures<'a> {
    inner: Peekable<RuptureSiteIter<'a>>,
}

impl<'a> Iterator for SourceRuptures<'a> {
    type Item = Result<(&'a dyn SeismicSource, Vec<Rupture>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.inner.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };

        let mut ruptures = vec![first.rupture];
        while let Some(Ok(row)) = self.inner.peek() {
            if row.source_index != first.source_index {
                break;
            }
            if let Some(Ok(row)) = self.inner.next() {
                ruptures.push(row.rupture);
            }
        }

        Some(Ok((first.source, ruptures)))
    }
}

// ─────────────────────────────────────────────
// 4. RuptureSiteDistanceFilter
// ─────────────────────────────────────────────

/// Rupture-level distance filter, applied inside bulk GMF computation
#[derive(Debug, Clone, Copy)]
pub struct RuptureSiteDistanceFilter {
    /// Integration distance in km
    pub maximum_distance: f64,
}

impl RuptureSiteDistanceFilter {
    /// Sites within range of the rupture, or `None`
    pub fn apply(&self, rupture: &Rupture, sites: &SiteCollection) -> Option<SiteCollection> {
        filter_sites_by_distance_to_rupture(rupture, self.maximum_distance, sites)
    }
}

/// Build a rupture/site distance filter
pub fn rupture_site_distance_filter(maximum_distance: f64) -> RuptureSiteDistanceFilter {
    RuptureSiteDistanceFilter { maximum_distance }
}
