//! Integration tests for the runner, coordinator and worker
//!
//! These tests drive complete mining runs against the scripted simulator and
//! real files in temporary directories.

#[cfg(test)]
mod tests {
    use crate::{
        coordination::{LocalResultStore, ResultStore},
        error::ConfigurationError,
        formats::GraspCandidate,
        mining::MinerConfigBuilder,
        runner::{JobStatus, MineArgs, MiningSummary, SeedErrorPolicy, run_mining},
        session::{SessionFactory, SimulatorSettingsBuilder, testing::ScriptedSimulator},
    };
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    // ============ Test Helpers ============

    /// Temp workspace with simulator and plugin directories
    fn setup_workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("graspit")).unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        dir
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Default arguments: scripted simulator, 40 steps, 3 grasps per model
    fn mine_args(dir: &TempDir, sim: &ScriptedSimulator, models: &[&str], parallelism: usize) -> MineArgs {
        let factory: Arc<dyn SessionFactory> = Arc::new(sim.clone());
        MineArgs {
            simulator: SimulatorSettingsBuilder::default()
                .install_dir(dir.path().join("graspit"))
                .plugin_dir(dir.path().join("plugins"))
                .build()
                .unwrap(),
            models: models.iter().map(|m| m.to_string()).collect(),
            models_file: None,
            grasps_file: None,
            seed_errors: SeedErrorPolicy::Ignore,
            output_dir: Some(dir.path().join("out")),
            miner: MinerConfigBuilder::default()
                .max_steps(40usize)
                .max_grasps(3usize)
                .build()
                .unwrap(),
            parallelism,
            quiet: true,
            test_factory: Some(factory),
        }
    }

    fn read_result(path: &Path) -> Vec<serde_json::Value> {
        let text = std::fs::read_to_string(path).unwrap();
        serde_json::from_str::<serde_json::Value>(&text)
            .unwrap()
            .as_array()
            .unwrap()
            .clone()
    }

    fn assert_best_first(grasps: &[GraspCandidate]) {
        for pair in grasps.windows(2) {
            assert!(pair[0].score() >= pair[1].score());
        }
    }

    fn config_error(err: &anyhow::Error) -> &ConfigurationError {
        err.downcast_ref::<ConfigurationError>()
            .unwrap_or_else(|| panic!("expected a configuration error, got {:#}", err))
    }

    fn model_names(summary: &MiningSummary) -> Vec<&str> {
        summary.models.iter().map(|m| m.model.as_str()).collect()
    }

    // ============ Tests ============

    #[tokio::test]
    async fn test_two_models_sequential() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();

        let summary = run_mining(mine_args(&dir, &sim, &["glass", "mug"], 1))
            .await
            .unwrap();

        assert_eq!(model_names(&summary), vec!["glass", "mug"]);
        assert_eq!(summary.failed_jobs(), 0);
        for model in &summary.models {
            assert_eq!(model.status, JobStatus::Completed);
            assert!(!model.grasps.is_empty() && model.grasps.len() <= 3);
            assert_eq!(model.evaluations, 40);
            assert_best_first(&model.grasps);

            let path = dir.path().join("out").join(format!("{}.json", model.model));
            assert_eq!(model.output.as_deref(), Some(path.as_path()));

            let entries = read_result(&path);
            assert_eq!(entries.len(), model.grasps.len());
            for entry in &entries {
                assert_eq!(entry["body"], model.model.as_str());
                assert_eq!(entry["pose"].as_array().unwrap().len(), 7);
                assert_eq!(entry["dofs"].as_array().unwrap().len(), sim.hand_dofs);
            }
        }
        assert_eq!(sim.started.load(Ordering::SeqCst), 2);
        assert_eq!(sim.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let models = ["glass", "mug", "bowl", "plate", "cup"];

        let dir_a = setup_workspace();
        let sequential = run_mining(mine_args(&dir_a, &ScriptedSimulator::default(), &models, 1))
            .await
            .unwrap();

        let dir_b = setup_workspace();
        let sim = ScriptedSimulator::default();
        let parallel = run_mining(mine_args(&dir_b, &sim, &models, 3))
            .await
            .unwrap();

        assert_eq!(model_names(&sequential), model_names(&parallel));
        for (a, b) in sequential.models.iter().zip(&parallel.models) {
            assert_eq!(a.grasps, b.grasps, "{} differs", a.model);
        }
        assert_eq!(sim.closed.load(Ordering::SeqCst), models.len());
    }

    #[tokio::test]
    async fn test_lost_session_isolated_sequential() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default().lose("bowl", 8);

        let summary = run_mining(mine_args(&dir, &sim, &["glass", "bowl", "mug"], 1))
            .await
            .unwrap();

        assert_eq!(summary.models.len(), 3);
        let bowl = summary.get("bowl").unwrap();
        assert!(matches!(bowl.status, JobStatus::Partial(_)));
        assert!(bowl.grasps.len() <= 3);
        assert_eq!(bowl.evaluations, 9);
        assert!(dir.path().join("out").join("bowl.json").exists());

        for model in ["glass", "mug"] {
            let s = summary.get(model).unwrap();
            assert_eq!(s.status, JobStatus::Completed);
            assert!(!s.grasps.is_empty());
        }
        assert_eq!(summary.failed_jobs(), 1);
    }

    #[tokio::test]
    async fn test_lost_session_isolated_parallel() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default().lose("bowl", 0).unknown("ghost");

        let summary = run_mining(mine_args(&dir, &sim, &["glass", "bowl", "ghost", "mug"], 4))
            .await
            .unwrap();

        assert_eq!(model_names(&summary), vec!["bowl", "ghost", "glass", "mug"]);
        let bowl = summary.get("bowl").unwrap();
        assert!(matches!(bowl.status, JobStatus::Partial(_)));
        assert!(bowl.grasps.is_empty());
        assert_eq!(read_result(&dir.path().join("out").join("bowl.json")).len(), 0);

        assert!(matches!(
            summary.get("ghost").unwrap().status,
            JobStatus::Failed(_)
        ));
        assert_eq!(summary.get("glass").unwrap().status, JobStatus::Completed);
        assert_eq!(summary.get("mug").unwrap().status, JobStatus::Completed);

        // Every started session is closed, including the broken ones
        assert_eq!(sim.started.load(Ordering::SeqCst), 4);
        assert_eq!(sim.closed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_launch_failures_keep_mapping_complete() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default().fail_launches(2);

        let summary = run_mining(mine_args(&dir, &sim, &["glass", "mug", "bowl"], 2))
            .await
            .unwrap();

        assert_eq!(summary.models.len(), 3);
        let failed: Vec<_> = summary
            .models
            .iter()
            .filter(|m| matches!(m.status, JobStatus::Failed(_)))
            .collect();
        assert_eq!(failed.len(), 2);
        for model in failed {
            assert!(model.grasps.is_empty());
        }
        assert_eq!(summary.failed_jobs(), 2);
        assert_eq!(sim.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_models_file_and_base_names() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();
        let models_file = write_file(&dir, "models.txt", "glass\n\n# skipped\nobjects/ycb/mug\n");

        let mut args = mine_args(&dir, &sim, &["ignored"], 1);
        args.models_file = Some(models_file);
        let summary = run_mining(args).await.unwrap();

        assert_eq!(model_names(&summary), vec!["glass", "objects/ycb/mug"]);
        let mug = read_result(&dir.path().join("out").join("mug.json"));
        assert!(!mug.is_empty());
        assert_eq!(mug[0]["body"], "mug");
        assert!(!dir.path().join("out").join("ignored.json").exists());
    }

    #[tokio::test]
    async fn test_seeds_propagate_to_every_job() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();
        // 150 mm above the object, identity orientation (w first)
        let grasps_file = write_file(
            &dir,
            "grasps.txt",
            "5 0,1 0,1 0,1 0,1\n0 0 0 150 1 0 0 0\n",
        );

        let mut args = mine_args(&dir, &sim, &["glass", "mug"], 2);
        args.grasps_file = Some(grasps_file);
        args.miner.max_grasps = 0;
        args.miner.max_steps = 10;
        let summary = run_mining(args).await.unwrap();

        assert_eq!(summary.seeds_loaded, 1);
        for model in &summary.models {
            assert_eq!(model.evaluations, 11);
            let seeded = model
                .grasps
                .iter()
                .find(|g| g.pose.position == [0.0, 0.0, 0.15])
                .unwrap_or_else(|| panic!("{}: seed grasp missing", model.model));
            assert_eq!(seeded.pose.orientation, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(seeded.dofs, vec![0.2; 4]);
        }

        // Results read back through the store match the summary
        let store = LocalResultStore::new(dir.path().join("out"));
        let glass = store.load("glass").await.unwrap();
        let expected = &summary.get("glass").unwrap().grasps;
        assert_eq!(glass.len(), expected.len());
        for (loaded, mined) in glass.iter().zip(expected) {
            for (a, b) in loaded.pose.to_array().iter().zip(mined.pose.to_array()) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_seeds_ignored_by_default() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();
        let grasps_file = write_file(&dir, "grasps.txt", "5 0.1 0.2\n1 0 0 0 1 0 0 0\n");

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        args.grasps_file = Some(grasps_file);
        let summary = run_mining(args).await.unwrap();

        assert_eq!(summary.seeds_loaded, 0);
        assert_eq!(summary.get("glass").unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_malformed_seeds_abort_when_strict() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();
        let grasps_file = write_file(&dir, "grasps.txt", "5 0.1 0.2\n1 0 0 0 1 0 0 0\n");

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        args.grasps_file = Some(grasps_file);
        args.seed_errors = SeedErrorPolicy::Abort;
        let err = run_mining(args).await.unwrap_err();

        assert!(format!("{:#}", err).contains("line 2"));
        assert_eq!(sim.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_directories_fail_before_mining() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        args.simulator.install_dir = dir.path().join("nope");
        let err = run_mining(args).await.unwrap_err();
        assert!(matches!(
            config_error(&err),
            ConfigurationError::MissingDirectory { what: "GraspIt", .. }
        ));

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        args.simulator.plugin_dir = dir.path().join("nope");
        let err = run_mining(args).await.unwrap_err();
        assert!(matches!(
            config_error(&err),
            ConfigurationError::MissingDirectory { what: "plugins", .. }
        ));

        assert_eq!(sim.started.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_missing_files_and_output_dir() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        args.models_file = Some(dir.path().join("models.txt"));
        let err = run_mining(args).await.unwrap_err();
        assert!(matches!(config_error(&err), ConfigurationError::MissingFile { .. }));

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        args.grasps_file = Some(dir.path().join("grasps.txt"));
        let err = run_mining(args).await.unwrap_err();
        assert!(matches!(config_error(&err), ConfigurationError::MissingFile { .. }));

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        args.output_dir = None;
        let err = run_mining(args).await.unwrap_err();
        assert!(matches!(config_error(&err), ConfigurationError::MissingOutputDir));

        let args = mine_args(&dir, &sim, &[], 1);
        let err = run_mining(args).await.unwrap_err();
        assert!(matches!(config_error(&err), ConfigurationError::NoModels));

        assert_eq!(sim.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_output_dir_is_created() {
        let dir = setup_workspace();
        let sim = ScriptedSimulator::default();

        let mut args = mine_args(&dir, &sim, &["glass"], 1);
        let nested = dir.path().join("a").join("b").join("c");
        args.output_dir = Some(nested.clone());
        let summary = run_mining(args).await.unwrap();

        assert_eq!(summary.output_dir, nested);
        assert!(nested.join("glass.json").exists());
    }
}
