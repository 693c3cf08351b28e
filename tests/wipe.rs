/// Wipe and NULLDRIVE integration tests
///
/// Runs `WipeJob` queues against a scripted runner and checks the exact
/// tool sequence, the events and the tamper log.
#[path = "common/mod.rs"]
mod common;

use blackstorm_engine::erase::WipeJob;
use blackstorm_engine::events::EventSink;
use blackstorm_engine::logging::TamperLog;
use blackstorm_engine::{CancelToken, EngineConfig, JobEvent, PostErase, WipeMethod, WipeOptions, WipeOutcome, WipeRequest};
use common::fixtures::{
    drain, finished_events, hdparm_frozen, hdparm_locked, log_messages, progress_values, sha256_line, test_config,
    HDPARM_NOT_FROZEN,
};
use common::mock_commands::{MockCommandOutput, MockToolRunner};
use tempfile::TempDir;

const DEVICE: &str = "/dev/sdz";
const TEN_MIB: &str = "10485760";

fn run_with(
    runner: &MockToolRunner,
    config: &EngineConfig,
    request: WipeRequest,
    cancel: &CancelToken,
) -> (WipeOutcome, Vec<JobEvent>) {
    let (sink, mut rx) = EventSink::channel();
    let outcome = WipeJob::new(runner, config, &sink, cancel, request).run();
    (outcome, drain(&mut rx))
}

fn run(runner: &MockToolRunner, dir: &TempDir, request: WipeRequest) -> (WipeOutcome, Vec<JobEvent>) {
    run_with(runner, &test_config(dir.path()), request, &CancelToken::new())
}

fn tamper_types(dir: &TempDir) -> Vec<String> {
    TamperLog::read_all(&test_config(dir.path()).tamper_log_path())
        .unwrap()
        .into_iter()
        .map(|event| event.event_type)
        .collect()
}

/// A sized ATA disk with nothing mounted.
fn ata_disk() -> MockToolRunner {
    let runner = MockToolRunner::new();
    runner
        .register("blockdev", MockCommandOutput::success(TEN_MIB))
        .register("lsblk", MockCommandOutput::success(""));
    runner
}

#[test]
fn test_quick_wipe_command_sequence() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();

    let (outcome, events) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::Quick));

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Wiped 1 device(s) with quick");

    let commands = runner.commands();
    assert_eq!(commands[0], "blockdev --getsize64 /dev/sdz");
    assert_eq!(commands[1], "lsblk -nro MOUNTPOINT /dev/sdz");
    assert_eq!(commands[2], "wipefs -a /dev/sdz");
    assert_eq!(
        commands[3],
        "dd if=/dev/zero of=/dev/sdz bs=1M count=10485760 iflag=fullblock,count_bytes status=progress"
    );
    assert_eq!(commands[4], "sync");
    assert!(commands[5].starts_with("cmp -n 1048576 -i 0:0 /dev/sdz"));
    assert!(!runner.ran("blkdiscard"));

    let verification = outcome.results[0].verification.as_ref().unwrap();
    assert!(verification.passed);

    assert_eq!(tamper_types(&dir), vec!["wipe_start", "wipe_complete"]);

    let devices: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::DeviceFinished { success, .. } => Some(*success),
            _ => None,
        })
        .collect();
    assert_eq!(devices, vec![true]);
    assert_eq!(progress_values(&events).last(), Some(&100));
    assert_eq!(finished_events(&events).len(), 1);
}

#[test]
fn test_dod_writes_three_passes_and_checks_entropy() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register(
        "| ent -t",
        MockCommandOutput::success(
            "0,File-bytes,Entropy,Chi-square,Mean,Monte-Carlo-Pi,Serial-Correlation\n\
             1,1048576,7.999812,250.10,127.49,3.141,0.0001\n",
        ),
    );

    let (outcome, _) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::Dod));

    assert!(outcome.success, "{}", outcome.message);
    let zeros = runner.position("dd if=/dev/zero of=/dev/sdz").unwrap();
    let ones = runner.position("tr '\\000' '\\377' < /dev/zero | dd").unwrap();
    let random = runner.position("dd if=/dev/urandom of=/dev/sdz").unwrap();
    assert!(zeros < ones && ones < random);

    let verification = outcome.results[0].verification.as_ref().unwrap();
    assert_eq!(verification.entropy, Some(7.999812));
}

#[test]
fn test_low_entropy_fails_the_device() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("| ent -t", MockCommandOutput::success("1,1048576,3.2,0,0,0,0\n"));

    let (outcome, events) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::Dod));

    assert!(!outcome.success);
    assert_eq!(outcome.message, "1 of 1 device(s) failed");
    assert!(outcome.results[0].message.starts_with("Verification failed"));
    assert_eq!(tamper_types(&dir), vec!["wipe_start", "wipe_failed"]);
    assert!(!progress_values(&events).contains(&100));
}

#[test]
fn test_custom_pattern_alternates_with_random() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("| ent -t", MockCommandOutput::success("1,1048576,7.95,0,0,0,0\n"));
    let method = WipeMethod::Custom {
        pattern: Some(vec![0xAA, 0x55]),
        passes: 2,
    };

    let (outcome, _) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], method));

    assert!(outcome.success, "{}", outcome.message);
    let pattern = runner.position("while cat").unwrap();
    let random = runner.position("dd if=/dev/urandom").unwrap();
    assert!(pattern < random);
    assert!(runner.ran("| ent -t"));
}

#[test]
fn test_gutmann_reports_shred_progress() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register(
        "shred",
        MockCommandOutput::progress("shred: /dev/sdz: pass 3/35 (random)...5.0GiB/10GiB 50%\n"),
    );

    let (outcome, events) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::Gutmann));

    assert!(outcome.success, "{}", outcome.message);
    assert!(runner.ran("shred -v -n 35 -z /dev/sdz"));
    assert!(progress_values(&events).contains(&7));
}

#[test]
fn test_nist_refuses_to_wipe_mounted_disk() {
    let dir = TempDir::new().unwrap();
    let runner = MockToolRunner::new();
    runner
        .register("blockdev", MockCommandOutput::success(TEN_MIB))
        .register("lsblk", MockCommandOutput::success("/mnt/data\n"))
        .register("umount", MockCommandOutput::failure("umount: /mnt/data: target is busy.").with_exit_code(32));

    let (outcome, _) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::Nist));

    assert!(!outcome.success);
    assert!(outcome.results[0].message.starts_with("Failed to unmount /dev/sdz"));
    assert!(!runner.ran("dd if="));
    assert!(!runner.ran("wipefs"));
}

#[test]
fn test_quick_wipe_continues_past_unmount_failure() {
    let dir = TempDir::new().unwrap();
    let runner = MockToolRunner::new();
    runner
        .register("blockdev", MockCommandOutput::success(TEN_MIB))
        .register("lsblk", MockCommandOutput::success("/mnt/data\n"))
        .register("umount", MockCommandOutput::failure("umount: /mnt/data: target is busy."));

    let (outcome, _) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::Quick));

    assert!(outcome.success, "{}", outcome.message);
    assert!(runner.ran("dd if=/dev/zero"));
}

#[test]
fn test_queue_reports_each_device() {
    let dir = TempDir::new().unwrap();
    let runner = MockToolRunner::new();
    runner
        .register(
            "blockdev --getsize64 /dev/sdy",
            MockCommandOutput::failure("blockdev: cannot open /dev/sdy: No such file or directory"),
        )
        .register("blockdev", MockCommandOutput::success(TEN_MIB))
        .register("lsblk", MockCommandOutput::success(""));
    let request = WipeRequest::new(vec!["/dev/sdy".to_string(), DEVICE.to_string()], WipeMethod::Quick);

    let (outcome, events) = run(&runner, &dir, request);

    assert!(!outcome.success);
    assert_eq!(outcome.message, "1 of 2 device(s) failed");
    assert!(outcome.results[0].message.starts_with("Device not found"));
    assert!(outcome.results[1].success);

    let devices: Vec<(String, bool)> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::DeviceFinished { device, success, .. } => Some((device.clone(), *success)),
            _ => None,
        })
        .collect();
    assert_eq!(devices, vec![("/dev/sdy".to_string(), false), (DEVICE.to_string(), true)]);
    assert_eq!(finished_events(&events), vec![(false, "1 of 2 device(s) failed".to_string())]);
}

#[test]
fn test_brick_without_password_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    let options = WipeOptions {
        post_erase: PostErase::Brick,
        ..Default::default()
    };
    let request = WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive).with_options(options);

    let (outcome, _) = run(&runner, &dir, request);

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Wipe failed: Invalid options"), "{}", outcome.message);
    assert!(runner.commands().is_empty());
}

#[test]
fn test_cancel_during_pass_records_failure() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    let cancel = CancelToken::new();
    runner.register(
        "dd if=/dev/zero",
        MockCommandOutput::progress("1048576 bytes (1.0 MB, 1.0 MiB) copied, 1 s, 1 MB/s\n").then_cancel(&cancel),
    );
    let request = WipeRequest::new(vec![DEVICE.to_string(), "/dev/sdy".to_string()], WipeMethod::Quick);

    let (outcome, events) = run_with(&runner, &test_config(dir.path()), request, &cancel);

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Wipe cancelled by user");
    assert_eq!(outcome.results.len(), 1);
    assert!(!runner.ran("/dev/sdy"));
    assert_eq!(tamper_types(&dir), vec!["wipe_start", "wipe_failed"]);
    assert_eq!(finished_events(&events).len(), 1);
}

#[test]
fn test_nulldrive_ata_enhanced_erase() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner
        .register("hdparm -I", MockCommandOutput::success(HDPARM_NOT_FROZEN))
        .register_sequence(
            "| sha256sum",
            vec![
                MockCommandOutput::success(&sha256_line('a', "-")),
                MockCommandOutput::success(&sha256_line('0', "-")),
            ],
        );
    let request = WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive);

    let (outcome, _) = run(&runner, &dir, request);

    assert!(outcome.success, "{}", outcome.message);
    let set_pass = runner
        .position("hdparm --user-master u --security-set-pass NULLDRIVE /dev/sdz")
        .unwrap();
    let erase = runner
        .position("hdparm --user-master u --security-erase-enhanced NULLDRIVE /dev/sdz")
        .unwrap();
    assert!(set_pass < erase);
    assert!(!runner.ran("wipefs"));
    assert!(!runner.ran("shred"));

    let tamper = TamperLog::read_all(&test_config(dir.path()).tamper_log_path()).unwrap();
    let secure = tamper.iter().find(|e| e.event_type == "secure_erase").unwrap();
    assert!(secure.message.contains("verification=PASSED"));
    assert!(secure.message.contains("type=ATA"));
}

#[test]
fn test_nulldrive_unchanged_hash_fails() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner
        .register("hdparm -I", MockCommandOutput::success(HDPARM_NOT_FROZEN))
        .register("| sha256sum", MockCommandOutput::success(&sha256_line('a', "-")));

    let (outcome, _) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive));

    assert!(!outcome.success);
    assert!(outcome.results[0].message.contains("unchanged"));
}

#[test]
fn test_nulldrive_frozen_drive_is_not_erased() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("hdparm -I", MockCommandOutput::success(&hdparm_frozen()));

    let (outcome, events) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive));

    assert!(!outcome.success);
    assert!(outcome.results[0].message.contains("frozen"));
    assert_eq!(runner.count("hdparm -I"), 2);
    assert!(!runner.ran("--security-erase"));
    assert!(events
        .iter()
        .any(|e| matches!(e, JobEvent::FrozenDrive { device } if device == DEVICE)));
}

#[test]
fn test_nulldrive_frozen_drive_can_fall_back_to_shred() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("hdparm -I", MockCommandOutput::success(&hdparm_frozen()));
    let config = EngineConfig {
        frozen_fallback_to_shred: true,
        ..test_config(dir.path())
    };

    let (outcome, _) = run_with(
        &runner,
        &config,
        WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive),
        &CancelToken::new(),
    );

    assert!(outcome.success, "{}", outcome.message);
    assert!(runner.ran("shred -v -n 2 -z /dev/sdz"));
}

#[test]
fn test_nulldrive_thawed_drive_is_erased() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register_sequence(
        "hdparm -I",
        vec![
            MockCommandOutput::success(&hdparm_frozen()),
            MockCommandOutput::success(HDPARM_NOT_FROZEN),
        ],
    );

    let (outcome, _) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive));

    assert!(outcome.success, "{}", outcome.message);
    assert!(runner.ran("--security-erase-enhanced"));
}

#[test]
fn test_nulldrive_locked_drive_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("hdparm -I", MockCommandOutput::success(&hdparm_locked()));

    let (outcome, _) = run(&runner, &dir, WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive));

    assert!(!outcome.success);
    assert!(outcome.results[0].message.starts_with("Unsupported device"));
    assert!(!runner.ran("--security-set-pass"));
}

#[test]
fn test_nulldrive_lock_sets_user_password() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("hdparm -I", MockCommandOutput::success(HDPARM_NOT_FROZEN));
    let options = WipeOptions {
        post_erase: PostErase::Lock,
        lock_password: Some("s3cret".to_string()),
        ..Default::default()
    };
    let request = WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive).with_options(options);

    let (outcome, _) = run(&runner, &dir, request);

    assert!(outcome.success, "{}", outcome.message);
    let erase = runner.position("--security-erase-enhanced").unwrap();
    let lock = runner.position("--security-set-pass s3cret").unwrap();
    assert!(erase < lock);
}

#[test]
fn test_nulldrive_nvme_sanitize() {
    let dir = TempDir::new().unwrap();
    let runner = MockToolRunner::new();
    runner
        .register("blockdev", MockCommandOutput::success(TEN_MIB))
        .register("lsblk", MockCommandOutput::success(""))
        .register("nvme id-ctrl", MockCommandOutput::success("oacs      : 0x17\nsanicap   : 0x2\n"))
        .register("nvme sanitize-log", MockCommandOutput::success("Sanitize Status (SSTAT) :  0x101\n"));

    let request = WipeRequest::new(vec!["/dev/nvme0n1".to_string()], WipeMethod::NullDrive);
    let (outcome, _) = run(&runner, &dir, request);

    assert!(outcome.success, "{}", outcome.message);
    assert!(runner.ran("nvme sanitize /dev/nvme0n1 --sanact=2 --ause"));
    assert!(!runner.ran("nvme format"));
    assert!(!runner.ran("hdparm"));
}

#[test]
fn test_nulldrive_nvme_falls_back_to_secure_format() {
    let dir = TempDir::new().unwrap();
    let runner = MockToolRunner::new();
    runner
        .register("blockdev", MockCommandOutput::success(TEN_MIB))
        .register("lsblk", MockCommandOutput::success(""))
        .register("nvme id-ctrl", MockCommandOutput::success("oacs      : 0x17\nsanicap   : 0x2\n"))
        .register("nvme sanitize-log", MockCommandOutput::success("sstat : 0x3\n"));

    let request = WipeRequest::new(vec!["/dev/nvme0n1".to_string()], WipeMethod::NullDrive);
    let (outcome, _) = run(&runner, &dir, request);

    assert!(outcome.success, "{}", outcome.message);
    assert!(runner.ran("nvme format /dev/nvme0n1 --ses=1 --force"));
    assert!(!runner.ran("--ses=0"));
    assert!(!runner.ran("shred"));
}

#[test]
fn test_nulldrive_nvme_shreds_when_nothing_else_works() {
    let dir = TempDir::new().unwrap();
    let runner = MockToolRunner::new();
    runner
        .register("blockdev", MockCommandOutput::success(TEN_MIB))
        .register("lsblk", MockCommandOutput::success(""))
        .register("nvme id-ctrl", MockCommandOutput::success("oacs      : 0x6\nsanicap   : 0\n"))
        .register("nvme format", MockCommandOutput::failure("NVMe status: INVALID_FORMAT"));

    let request = WipeRequest::new(vec!["/dev/nvme0n1".to_string()], WipeMethod::NullDrive);
    let (outcome, _) = run(&runner, &dir, request);

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(runner.count("nvme format"), 2);
    assert!(runner.ran("shred -v -n 2 -z /dev/nvme0n1"));
}

// ==================== PRE-WIPE STEPS ====================

fn quick_with(options: WipeOptions) -> WipeRequest {
    WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::Quick).with_options(options)
}

#[test]
fn test_memory_wipe_drops_caches_before_writing() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    let options = WipeOptions {
        memory_wipe: true,
        ..Default::default()
    };

    let (outcome, _) = run(&runner, &dir, quick_with(options));

    assert!(outcome.success, "{}", outcome.message);
    let drop = runner
        .position("sync && echo 3 > /proc/sys/vm/drop_caches")
        .unwrap();
    assert!(drop < runner.position("wipefs -a").unwrap());
    assert_eq!(tamper_types(&dir), vec!["wipe_start", "memory_wipe", "wipe_complete"]);
}

#[test]
fn test_memory_wipe_failure_is_only_a_warning() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("drop_caches", MockCommandOutput::failure("Permission denied"));
    let options = WipeOptions {
        memory_wipe: true,
        ..Default::default()
    };

    let (outcome, events) = run(&runner, &dir, quick_with(options));

    assert!(outcome.success, "{}", outcome.message);
    assert!(log_messages(&events)
        .iter()
        .any(|m| m.starts_with("Warning: could not wipe volatile memory")));
    assert_eq!(tamper_types(&dir), vec!["wipe_start", "wipe_complete"]);
}

#[test]
fn test_thermal_stress_runs_timed_fio_rounds_first() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    let options = WipeOptions {
        thermal_stress: true,
        stress_duration_secs: 25,
        stress_temp_c: 75,
        ..Default::default()
    };

    let (outcome, events) = run(&runner, &dir, quick_with(options));

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(runner.count("fio --name=stress --filename=/dev/sdz"), 3);
    assert_eq!(runner.count("--runtime=10 --time_based"), 2);
    assert_eq!(runner.count("--runtime=5 --time_based"), 1);
    assert!(runner.position("fio").unwrap() < runner.position("wipefs -a").unwrap());
    assert!(log_messages(&events)
        .iter()
        .any(|m| m.contains("target 75°C")));
    assert_eq!(
        tamper_types(&dir),
        vec!["wipe_start", "stress_test_start", "stress_test_complete", "wipe_complete"]
    );
}

#[test]
fn test_failed_stress_round_does_not_stop_the_wipe() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.register("fio", MockCommandOutput::failure("fio: pid=0, err=13/file:filesetup.c"));
    let options = WipeOptions {
        thermal_stress: true,
        stress_duration_secs: 60,
        ..Default::default()
    };

    let (outcome, _) = run(&runner, &dir, quick_with(options));

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(runner.count("fio"), 1);
    assert!(runner.ran("dd if=/dev/zero of=/dev/sdz"));
    assert_eq!(
        tamper_types(&dir),
        vec!["wipe_start", "stress_test_start", "wipe_complete"]
    );
}

#[test]
fn test_thermal_stress_skipped_without_fio() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner.without_tool("fio");
    let options = WipeOptions {
        thermal_stress: true,
        ..Default::default()
    };

    let (outcome, events) = run(&runner, &dir, quick_with(options));

    assert!(outcome.success, "{}", outcome.message);
    assert!(!runner.ran("fio"));
    assert!(log_messages(&events)
        .iter()
        .any(|m| m.contains("fio is not installed")));
}

#[test]
fn test_thermal_stress_needs_a_duration() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    let options = WipeOptions {
        thermal_stress: true,
        stress_duration_secs: 0,
        ..Default::default()
    };

    let (outcome, _) = run(&runner, &dir, quick_with(options));

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Wipe failed: Invalid options"));
    assert!(runner.commands().is_empty());
}

#[test]
fn test_failed_ata_erase_reports_failed_security_disable() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner
        .register("hdparm -I", MockCommandOutput::success(HDPARM_NOT_FROZEN))
        .register("| sha256sum", MockCommandOutput::success(&sha256_line('a', "-")))
        .register("--security-erase-enhanced", MockCommandOutput::failure("SG_IO: bad/missing sense data"))
        .register("--security-disable", MockCommandOutput::failure("security_password: Input/output error"));
    let request = WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive);

    let (outcome, events) = run(&runner, &dir, request);

    assert!(!outcome.success);
    assert_eq!(outcome.message, "1 of 1 device(s) failed");
    assert!(runner.position("--security-disable").unwrap() > runner.position("--security-erase-enhanced").unwrap());
    let warning = log_messages(&events)
        .into_iter()
        .find(|m| m.contains("could not remove the security password from /dev/sdz"))
        .unwrap();
    assert!(warning.contains("Input/output error"));
}

#[test]
fn test_failed_ata_erase_removes_password() {
    let dir = TempDir::new().unwrap();
    let runner = ata_disk();
    runner
        .register("hdparm -I", MockCommandOutput::success(HDPARM_NOT_FROZEN))
        .register("| sha256sum", MockCommandOutput::success(&sha256_line('a', "-")))
        .register("--security-erase-enhanced", MockCommandOutput::failure("SG_IO: bad/missing sense data"));
    let request = WipeRequest::new(vec![DEVICE.to_string()], WipeMethod::NullDrive);

    let (outcome, events) = run(&runner, &dir, request);

    assert!(!outcome.success);
    assert!(log_messages(&events)
        .iter()
        .any(|m| m == "Security password removed from /dev/sdz"));
}
