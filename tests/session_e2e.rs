use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bufwatch::memory::{MemoryLayout, SimulatedMemory, SimulatedTarget};
use bufwatch::{
    AccessKind, AttachOutcome, BufferDescriptor, CustomBuffer, LogChange, Parser, Registry, SimTime, Target,
    TargetId, WatchConfig, WatchSession,
};

fn sim_target(id: u32) -> Arc<SimulatedTarget> {
    let memory = SimulatedMemory::new(0x1000, 0x4000, MemoryLayout::MSP430)
        .with_symbol("packetbuf_aligned", 0x2000)
        .with_symbol("node_id", 0x1200)
        .with_symbol("rx_buf", 0x2800);
    Arc::new(SimulatedTarget::new(id, Arc::new(memory)))
}

fn manual_session() -> WatchSession {
    let cfg = WatchConfig::from_json(r#"{"aggregator": {"flush_interval_ms": 60000}}"#).unwrap();
    WatchSession::new(cfg).unwrap()
}

#[test]
fn switch_descriptor_replaces_attachments_and_clears_log() {
    let mut s = manual_session();
    let a = sim_target(1);
    let b = sim_target(2);
    let targets: Vec<Arc<dyn Target>> = vec![a.clone() as Arc<dyn Target>, b.clone()];

    s.switch_descriptor(&BufferDescriptor::node_id(), &targets).unwrap();
    a.simulated_memory().write(0x1200, &[1, 0]);
    s.flush().unwrap();
    assert_eq!(s.len(), 1);

    let custom = BufferDescriptor::CustomSegment(CustomBuffer::parse("rx_buf", "8", "0").unwrap());
    let results = s.switch_descriptor(&custom, &targets).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().is_active()));
    assert_eq!(s.len(), 0);
    assert!(!a.simulated_memory().is_watched(0x1200, 2));
    assert!(a.simulated_memory().is_watched(0x2800, 8));

    b.simulated_memory().write(0x2804, &[0xff]);
    s.flush().unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(s.get(0).unwrap().source(), TargetId(2));
}

#[test]
fn switch_descriptor_rejects_invalid_without_changes() {
    let mut s = manual_session();
    let a = sim_target(1);
    let targets: Vec<Arc<dyn Target>> = vec![a.clone() as Arc<dyn Target>];
    s.switch_descriptor(&BufferDescriptor::node_id(), &targets).unwrap();

    let invalid = BufferDescriptor::integer("");
    let err = s.switch_descriptor(&invalid, &targets).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(s.attachments().len(), 1);
    assert!(a.simulated_memory().is_watched(0x1200, 2));
}

#[test]
fn per_target_failures_are_isolated() {
    let mut s = manual_session();
    let good = sim_target(1);
    let refusing = sim_target(2);
    let missing = Arc::new(SimulatedTarget::new(
        3,
        Arc::new(SimulatedMemory::new(0x1000, 0x100, MemoryLayout::MSP430)),
    ));
    refusing.simulated_memory().set_refuse_watches(true);

    let targets: Vec<Arc<dyn Target>> = vec![good.clone() as Arc<dyn Target>, refusing.clone(), missing];
    let results = s.switch_descriptor(&BufferDescriptor::packetbuf(), &targets).unwrap();

    assert!(results[0].1.as_ref().unwrap().is_active());
    assert!(results[1].1.as_ref().unwrap_err().is_registration());
    assert!(matches!(results[2].1, Ok(AttachOutcome::Inactive { .. })));
    assert_eq!(s.attachments().len(), 1);

    good.simulated_memory().write(0x2000, &[1]);
    s.flush().unwrap();
    assert_eq!(s.len(), 1);
}

#[test]
fn detach_target_drops_only_that_target() {
    let mut s = manual_session();
    let a = sim_target(1);
    let b = sim_target(2);
    s.attach(&BufferDescriptor::node_id(), a.clone()).unwrap();
    s.attach(&BufferDescriptor::packetbuf(), a.clone()).unwrap();
    s.attach(&BufferDescriptor::node_id(), b.clone()).unwrap();

    assert_eq!(s.detach_target(TargetId(1)), 2);
    assert_eq!(s.detach_target(TargetId(1)), 0);
    assert_eq!(a.simulated_memory().watch_count(), 0);
    assert_eq!(b.simulated_memory().watch_count(), 1);
}

#[test]
fn capacity_and_change_notifications() {
    let mut s = manual_session();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&changes);
    s.subscribe(move |c| seen.lock().unwrap().push(*c));

    let t = sim_target(1);
    s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
    for v in 0..5u8 {
        t.simulated_memory().write(0x1200, &[v, 0]);
    }
    s.flush().unwrap();
    assert_eq!(s.set_capacity(3), 2);
    assert_eq!(s.len(), 3);
    assert_eq!(s.capacity(), 3);
    assert_eq!(s.clear(), 3);

    assert_eq!(
        *changes.lock().unwrap(),
        vec![
            LogChange::Appended { first: 0, count: 5 },
            LogChange::Evicted { count: 2 },
            LogChange::Cleared { count: 3 },
        ]
    );
}

#[test]
fn export_and_time_lookup() {
    let mut s = manual_session();
    let t = sim_target(4);
    s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
    let mem = t.simulated_memory();

    t.advance(1_500 * SimTime::MILLISECOND);
    t.set_context(Some("main".to_string()));
    mem.write(0x1200, &[0x34, 0x12]);
    t.advance(SimTime::SECOND);
    t.set_context(None);
    mem.write(0x1200, &[0x35, 0x12]);
    mem.read_access(0x1200, 2);
    s.flush().unwrap();

    assert_eq!(s.len(), 3);
    assert_eq!(s.first_at_or_after(SimTime(2 * SimTime::SECOND)), Some(1));

    s.set_parser(Parser::IntegerArray);
    assert_eq!(
        s.export_text(),
        "00:01.500\tID:4\tWRITE\t4660\tmain\n00:02.500\tID:4\tWRITE\t4661\t[unknown]\n"
    );

    s.set_hide_reads(false);
    s.set_filter("READ").unwrap();
    s.set_inverse(true);
    let visible = s.visible();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|e| e.kind() == AccessKind::Write));
}

#[test]
fn graphical_parsers_export_hex() {
    let mut s = manual_session();
    let t = sim_target(1);
    s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
    t.set_context(Some("radio".to_string()));
    t.simulated_memory().write(0x1200, &[0x0f, 0xa0]);
    s.flush().unwrap();

    s.set_parser(Parser::Grayscale);
    let line = s.export_text();
    let fields: Vec<&str> = line.trim_end().split('\t').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[3], "0000000000001200:0fa0");
    assert_eq!(fields[3], s.get(0).unwrap().as_hex());
    assert_eq!(fields[4], "radio");

    s.set_parser(Parser::Height4Bits);
    assert_eq!(s.export_text(), line);
}

#[test]
fn zero_capacity_empties_the_log() {
    let mut s = manual_session();
    let t = sim_target(1);
    s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
    for v in 0..3u8 {
        t.simulated_memory().write(0x1200, &[v, 0]);
    }
    s.flush().unwrap();

    assert_eq!(s.set_capacity(0), 3);
    assert_eq!(s.capacity(), 0);
    t.simulated_memory().write(0x1200, &[9, 0]);
    s.flush().unwrap();
    assert!(s.is_empty());

    s.set_capacity(2);
    for v in 10..15u8 {
        t.simulated_memory().write(0x1200, &[v, 0]);
    }
    s.flush().unwrap();
    assert_eq!(s.len(), 2);
}

#[test]
fn periodic_flush_without_explicit_call() {
    let cfg = WatchConfig::from_json(r#"{"aggregator": {"flush_interval_ms": 10}}"#).unwrap();
    let mut s = WatchSession::new(cfg).unwrap();
    let t = sim_target(1);
    s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
    t.simulated_memory().write(0x1200, &[1, 0]);

    let deadline = Instant::now() + Duration::from_secs(5);
    while s.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(s.len(), 1);
}

#[test]
fn close_flushes_pending_and_unregisters() {
    let mut s = manual_session();
    let t = sim_target(1);
    s.attach(&BufferDescriptor::node_id(), t.clone()).unwrap();
    t.simulated_memory().write(0x1200, &[1, 0]);
    s.close().unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(t.simulated_memory().watch_count(), 0);

    t.simulated_memory().write(0x1200, &[2, 0]);
    assert_eq!(s.len(), 1);
    assert_eq!(s.late_events(), 0);
}

#[test]
fn registries_feed_the_session() {
    let descriptors = Registry::<BufferDescriptor>::builtin();
    let parsers = Registry::<Parser>::builtin();

    let mut s = manual_session();
    let t = sim_target(1);
    let d = descriptors.create("packetbuf_aligned").unwrap();
    assert!(s.attach(&d, t.clone()).unwrap().is_active());

    t.simulated_memory().write(0x2000, b"hi\0");
    s.flush().unwrap();
    s.set_parser(parsers.create("terminated_string").unwrap());
    assert_eq!(s.decode(0).unwrap().text(), "hi");
}
