use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use trialgen_core::{
    build_structure, generate_session, ConditionCode, LevelValue, SessionConfig, Trial,
};

fn temp_root(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "trialgen_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ))
}

#[test]
fn every_condition_runs_end_to_end() {
    for condition in ConditionCode::all() {
        let structure = build_structure(condition).expect("structure");
        let config = SessionConfig {
            random_seed: Some(31),
            ..SessionConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(31);
        let session = generate_session(&structure, &config, &mut rng).expect("session");
        assert_eq!(session.blocks_per_experiment(), structure.len());
        assert_eq!(session.total_trials(), structure.total_trials());

        let mut pulled = 0usize;
        for block in session.into_blocks() {
            let practice = block.practice();
            let trials: Vec<Trial> = block.collect();
            for trial in &trials {
                let target = trial.get("target").expect("target factor");
                assert_eq!(target.is_random(), practice, "{}", condition);
                let cue = trial.get("cue_validity").expect("cue factor");
                assert!(cue.as_bool().is_some());
            }
            pulled += trials.len();
        }
        assert_eq!(pulled, structure.total_trials());
    }
}

#[test]
fn config_file_drives_generation_and_dump() {
    let root = temp_root("config");
    fs::create_dir_all(&root).expect("temp dir");
    let config_path = root.join("session.yaml");
    let dump_path = root.join("out").join("trial_dump.txt");
    fs::write(
        &config_path,
        format!(
            "condition: I-B\nrun_practice_blocks: false\nmax_trials_per_block: 10\nrandom_seed: 9\ndump_path: {}\n",
            dump_path.display()
        ),
    )
    .expect("write config");

    let config = SessionConfig::load(&config_path).expect("load config");
    let condition = config.resolve_condition(None).expect("condition");
    assert_eq!(condition.to_string(), "I-B");
    let structure = build_structure(condition).expect("structure");
    let session = trialgen_core::generate_seeded_session(&structure, &config).expect("session");
    assert_eq!(session.seed(), Some(9));
    assert_eq!(session.labels().first().copied(), Some("acc"));
    assert!(session.blocks().iter().all(|b| b.remaining() == 10));

    session.write_dump(&config.dump_path).expect("write dump");
    let dump = fs::read_to_string(&dump_path).expect("read dump");
    assert_eq!(dump.matches("=== Block ").count(), 16);
    assert!(!dump.contains("practice"));
    assert!(dump.contains("target target_loc cue_validity"));
    assert!(!dump.contains(&LevelValue::Random.to_string()));
    let _ = fs::remove_dir_all(root);
}
