//! Workflow registry: `(source, workflow_type) → workflow factory`,
//! plus the starter-workflow map the intake service seeds jobs from.
//!
//! Registration is a static table built in `standard()`; a lookup miss
//! is a programmer error surfaced as [`WorkflowError::Unregistered`].
//! The factory wires each workflow with the dependency set its kind
//! needs: terminal kinds get the fetcher and store, fan-out kinds also
//! get the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use debtrace_bus::Publisher;
use debtrace_common::{Source, WorkflowType};
use debtrace_fetch::PageFetcher;
use debtrace_store::TaskStore;

use crate::engine::Workflow;
use crate::error::{Result, WorkflowError};
use crate::sources::{
    adb, afdb, aiib, bio, deg, dfc, ebrd, eib, fmo, idb, ifc, kfw, miga, nbim, pro, sec, undp, wb,
};

/// Shared dependencies handed to workflow factories at dispatch time.
#[derive(Clone)]
pub struct EngineDeps {
    pub fetcher: Arc<dyn PageFetcher>,
    pub store: Arc<dyn TaskStore>,
    pub publisher: Arc<dyn Publisher>,
    /// Directory holding reference data files (filer list etc.).
    pub config_dir: String,
}

type Factory = Box<dyn Fn(&EngineDeps) -> Workflow + Send + Sync>;

pub struct WorkflowRegistry {
    map: HashMap<(Source, WorkflowType), Factory>,
}

impl WorkflowRegistry {
    /// The full production registry covering every source.
    pub fn standard() -> Self {
        use Source::*;
        use WorkflowType::*;

        let mut registry = Self { map: HashMap::new() };

        // ADB: seed → results → project
        registry.insert(Adb, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(adb::AdbSeeder::new(d.fetcher.clone())),
                ResultsPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Adb, ResultsPage, |d| {
            Workflow::results(
                Arc::new(adb::AdbResultsScraper::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Adb, ProjectPage, |d| {
            Workflow::project(
                Arc::new(adb::AdbProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // AFDB: seed (bulk export) → project
        registry.insert(Afdb, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(afdb::AfdbSeeder::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Afdb, ProjectPage, |d| {
            Workflow::project(
                Arc::new(afdb::AfdbProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // AIIB: seed (project manifest) → project
        registry.insert(Aiib, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(aiib::AiibSeeder::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Aiib, ProjectPage, |d| {
            Workflow::project(
                Arc::new(aiib::AiibProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // BIO: seed → results-multi → project-partial
        registry.insert(Bio, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(bio::BioSeeder::new(d.fetcher.clone())),
                ResultsPageMulti,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Bio, ResultsPageMulti, |d| {
            Workflow::results_multi(
                Arc::new(bio::BioResultsScraper::new(d.fetcher.clone())),
                ProjectPagePartial,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Bio, ProjectPagePartial, |d| {
            Workflow::project_partial(
                Arc::new(bio::BioProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // Direct downloads
        registry.insert(Deg, Download, |d| {
            Workflow::download(
                Arc::new(deg::DegDownloader::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });
        registry.insert(Dfc, Download, |d| {
            Workflow::download(
                Arc::new(dfc::DfcDownloader::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });
        registry.insert(Kfw, Download, |d| {
            Workflow::download(
                Arc::new(kfw::KfwDownloader::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });
        registry.insert(Nbim, Download, |d| {
            Workflow::download(
                Arc::new(nbim::NbimDownloader::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });
        registry.insert(Wb, Download, |d| {
            Workflow::download(
                Arc::new(wb::WbDownloader::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // EBRD: seed → results → project
        registry.insert(Ebrd, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(ebrd::EbrdSeeder::new(d.fetcher.clone())),
                ResultsPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Ebrd, ResultsPage, |d| {
            Workflow::results(
                Arc::new(ebrd::EbrdResultsScraper::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Ebrd, ProjectPage, |d| {
            Workflow::project(
                Arc::new(ebrd::EbrdProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // EIB: seed (paged JSON list) → project
        registry.insert(Eib, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(eib::EibSeeder::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Eib, ProjectPage, |d| {
            Workflow::project(
                Arc::new(eib::EibProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // FMO: seed → results → project
        registry.insert(Fmo, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(fmo::FmoSeeder::new(d.fetcher.clone())),
                ResultsPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Fmo, ResultsPage, |d| {
            Workflow::results(
                Arc::new(fmo::FmoResultsScraper::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Fmo, ProjectPage, |d| {
            Workflow::project(
                Arc::new(fmo::FmoProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // IDB: seed → results → project
        registry.insert(Idb, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(idb::IdbSeeder::new(d.fetcher.clone())),
                ResultsPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Idb, ResultsPage, |d| {
            Workflow::results(
                Arc::new(idb::IdbResultsScraper::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Idb, ProjectPage, |d| {
            Workflow::project(
                Arc::new(idb::IdbProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // IFC: seed (search export) → project
        registry.insert(Ifc, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(ifc::IfcSeeder::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Ifc, ProjectPage, |d| {
            Workflow::project(
                Arc::new(ifc::IfcProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // MIGA: seed → results → project
        registry.insert(Miga, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(miga::MigaSeeder::new(d.fetcher.clone())),
                ResultsPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Miga, ResultsPage, |d| {
            Workflow::results(
                Arc::new(miga::MigaResultsScraper::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Miga, ProjectPage, |d| {
            Workflow::project(
                Arc::new(miga::MigaProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // PRO: seed (single list page) → project
        registry.insert(Pro, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(pro::ProSeeder::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Pro, ProjectPage, |d| {
            Workflow::project(
                Arc::new(pro::ProProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // UNDP: seed (id export) → project (JSON API)
        registry.insert(Undp, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(undp::UndpSeeder::new(d.fetcher.clone())),
                ProjectPage,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Undp, ProjectPage, |d| {
            Workflow::project(
                Arc::new(undp::UndpProjectScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        // SEC Form 13F: seed → filing-history → {filing-scrape,
        // filing-archive}; filing-archive → filing-scrape
        registry.insert(Sec, SeedUrls, |d| {
            Workflow::seed(
                Arc::new(sec::SecSeeder::new(&d.config_dir)),
                FilingHistory,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Sec, FilingHistory, |d| {
            Workflow::filing_history(
                Arc::new(sec::SecFilingHistory::new(d.fetcher.clone())),
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Sec, FilingArchive, |d| {
            Workflow::filing_archive(
                Arc::new(sec::SecFilingArchive::new(d.fetcher.clone())),
                FilingScrape,
                d.store.clone(),
                d.publisher.clone(),
            )
        });
        registry.insert(Sec, FilingScrape, |d| {
            Workflow::filing_scrape(
                Arc::new(sec::SecFilingScraper::new(d.fetcher.clone())),
                d.store.clone(),
            )
        });

        registry
    }

    fn insert(
        &mut self,
        source: Source,
        workflow_type: WorkflowType,
        factory: impl Fn(&EngineDeps) -> Workflow + Send + Sync + 'static,
    ) {
        self.map.insert((source, workflow_type), Box::new(factory));
    }

    /// Resolves and instantiates the workflow for a task message.
    pub fn get(
        &self,
        source: Source,
        workflow_type: WorkflowType,
        deps: &EngineDeps,
    ) -> Result<Workflow> {
        let factory = self
            .map
            .get(&(source, workflow_type))
            .ok_or(WorkflowError::Unregistered {
                src: source,
                workflow_type,
            })?;
        Ok(factory(deps))
    }

    pub fn contains(&self, source: Source, workflow_type: WorkflowType) -> bool {
        self.map.contains_key(&(source, workflow_type))
    }

    pub fn registered_pairs(&self) -> Vec<(Source, WorkflowType)> {
        self.map.keys().copied().collect()
    }
}

/// The entry-point workflow for each source.
pub fn starter_workflow(source: Source) -> WorkflowType {
    match source {
        Source::Deg | Source::Dfc | Source::Kfw | Source::Nbim | Source::Wb => {
            WorkflowType::Download
        }
        _ => WorkflowType::SeedUrls,
    }
}

/// Sources whose starter workflow matches the given type.
pub fn sources_with_starter(workflow_type: WorkflowType) -> Vec<Source> {
    Source::ALL
        .iter()
        .copied()
        .filter(|s| starter_workflow(*s) == workflow_type)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_deps;

    #[test]
    fn every_source_has_a_registered_starter() {
        let registry = WorkflowRegistry::standard();
        for source in Source::ALL {
            assert!(
                registry.contains(source, starter_workflow(source)),
                "starter workflow for {source} is not registered"
            );
        }
    }

    #[test]
    fn unknown_pair_is_an_explicit_error() {
        let registry = WorkflowRegistry::standard();
        let deps = test_deps();
        match registry.get(Source::Kfw, WorkflowType::ResultsPage, &deps) {
            Err(WorkflowError::Unregistered {
                src: source,
                workflow_type,
            }) => {
                assert_eq!(source, Source::Kfw);
                assert_eq!(workflow_type, WorkflowType::ResultsPage);
            }
            _ => panic!("expected an unregistered-workflow error"),
        }
    }

    #[test]
    fn dynamic_sentinel_is_never_registered() {
        let registry = WorkflowRegistry::standard();
        for source in Source::ALL {
            assert!(!registry.contains(source, WorkflowType::Dynamic));
        }
    }

    #[test]
    fn download_starters_match_the_bulk_sources() {
        let mut downloads = sources_with_starter(WorkflowType::Download);
        downloads.sort_by_key(|s| s.as_str());
        assert_eq!(
            downloads,
            vec![Source::Deg, Source::Dfc, Source::Kfw, Source::Nbim, Source::Wb]
        );
    }

    #[test]
    fn every_registered_pair_instantiates() {
        let registry = WorkflowRegistry::standard();
        let deps = test_deps();
        for (source, workflow_type) in registry.registered_pairs() {
            registry
                .get(source, workflow_type, &deps)
                .unwrap_or_else(|_| panic!("factory for {source}/{workflow_type} failed"));
        }
    }
}
