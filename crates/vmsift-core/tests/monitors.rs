//! Tests for monitor pool walking and reconciliation

mod common;

use std::sync::Arc;

use common::{ImageBuilder, MONITOR_POOL_SIZE};
use vmsift_core::heap::RegionMonitorCache;
use vmsift_core::monitors::{FlatMonitor, MonitorPoolWalker, MonitorWalker, ObjectMonitor};
use vmsift_core::session::AnalysisSession;
use vmsift_core::types::{Address, HeapRegion, SegmentType};

const FREE: u64 = 0x1;
const OBJECT: u64 = 0x2;

struct Fixture
{
    image: ImageBuilder,
    vm: Address,
    region: HeapRegion,
    objects: Vec<Address>,
    entries: Vec<Address>,
}

/// Heap of four live objects and a one-block monitor pool.
///
/// Object 0 holds a flat lock, object 1 is inflated to pool entry 1, objects
/// 2 and 3 are unlocked. Pool entry 0 is a system monitor, entry 2 is free,
/// and entry 3 is bound to object 3 although its lock word was never inflated.
fn fixture(with_thread_library: bool) -> Fixture
{
    let mut image = ImageBuilder::new();

    let block = image.alloc(8 + MONITOR_POOL_SIZE * 40);
    let entries: Vec<_> = (0..MONITOR_POOL_SIZE)
        .map(|index| image.field_address("MonitorPoolBlock", block, "entries") + index * 40)
        .collect();

    let (segment, base) = image.segment(SegmentType::OBJECT_HEAP, 4 * 32, 4 * 32);
    let objects: Vec<_> = (0..4).map(|index| base + index * 32).collect();
    for object in &objects {
        image.set("Object", *object, "size", 32);
        image.set("Object", *object, "flags", 1);
    }
    image.set("Object", objects[0], "lockword", 0x40);
    image.set("Object", objects[1], "lockword", entries[1].value() | 1);

    image.set("ThreadMonitor", entries[0], "flags", 0);
    let name = image.c_string("vm access");
    image.set_ptr("ThreadMonitor", entries[0], "name", name);
    image.set("ThreadMonitor", entries[1], "flags", OBJECT);
    image.set_ptr("ThreadMonitor", entries[1], "userData", objects[1]);
    image.set("ThreadMonitor", entries[1], "count", 2);
    image.set("ThreadMonitor", entries[2], "flags", FREE);
    image.set("ThreadMonitor", entries[3], "flags", OBJECT);
    image.set_ptr("ThreadMonitor", entries[3], "userData", objects[3]);

    let list = image.segment_list(&[segment]);
    let vm = image.alloc_struct("JavaVM");
    image.set_ptr("JavaVM", vm, "memorySegments", list);
    if with_thread_library {
        let library = image.alloc_struct("ThreadLibrary");
        image.set_ptr("ThreadLibrary", library, "monitorPool", block);
        image.set_ptr("JavaVM", vm, "threadLibrary", library);
    }

    Fixture {
        image,
        vm,
        region: HeapRegion::new(base, base + 4 * 32),
        objects,
        entries,
    }
}

#[test]
fn test_pool_walker_skips_free_entries()
{
    let fixture = fixture(true);
    let (session, events) = fixture.image.session(Some(fixture.vm));

    let pool: Vec<_> = MonitorPoolWalker::for_vm(&session).unwrap().collect();
    let addresses: Vec<_> = pool.iter().map(|monitor| monitor.address()).collect();
    assert_eq!(addresses, vec![fixture.entries[0], fixture.entries[1], fixture.entries[3]]);
    assert_eq!(pool[0].object, None);
    assert_eq!(pool[0].name(&session).unwrap().as_deref(), Some("vm access"));
    assert_eq!(pool[1].object, Some(fixture.objects[1]));
    assert_eq!(pool[1].count(&session).unwrap(), 2);
    assert!(events.is_empty());
}

#[test]
fn test_reconciliation_reports_each_monitor_once()
{
    let fixture = fixture(true);
    let (session, events) = fixture.image.session(Some(fixture.vm));

    let monitors: Vec<_> = MonitorWalker::new(&session).unwrap().collect();
    assert_eq!(
        monitors,
        vec![
            ObjectMonitor::System {
                monitor: fixture.entries[0]
            },
            ObjectMonitor::Inflated {
                monitor: fixture.entries[1],
                object: fixture.objects[1],
            },
            ObjectMonitor::Flat(FlatMonitor {
                object: fixture.objects[0],
                lock_word: 0x40,
            }),
        ]
    );
    assert!(events.is_empty());
}

#[test]
fn test_entry_skipped_when_object_inflated_to_another_monitor()
{
    let mut fixture = fixture(true);
    // Entry 3 still names object 3, whose lock word now points at entry 1.
    fixture
        .image
        .set("Object", fixture.objects[3], "lockword", fixture.entries[1].value() | 1);
    let (session, events) = fixture.image.session(Some(fixture.vm));

    let monitors: Vec<_> = MonitorWalker::new(&session).unwrap().collect();
    assert_eq!(monitors.len(), 3);
    assert!(monitors.iter().all(|monitor| monitor.object() != Some(fixture.objects[3])));
    assert_eq!(
        monitors[1],
        ObjectMonitor::Inflated {
            monitor: fixture.entries[1],
            object: fixture.objects[1],
        }
    );
    assert!(events.is_empty());
}

#[test]
fn test_inflated_monitor_wins_over_cached_flat()
{
    let fixture = fixture(true);
    // A cache filled before object 1 was inflated still lists it as flat.
    let cache = Arc::new(RegionMonitorCache::new());
    let stale = FlatMonitor {
        object: fixture.objects[1],
        lock_word: 0x80,
    };
    let flat = FlatMonitor {
        object: fixture.objects[0],
        lock_word: 0x40,
    };
    cache.insert_if_absent(fixture.region, vec![stale, flat]);

    let session = AnalysisSession::builder(Arc::new(fixture.image.memory()), fixture.image.schema().clone())
        .vm(fixture.vm)
        .monitor_cache(cache)
        .build();
    let monitors: Vec<_> = MonitorWalker::new(&session).unwrap().collect();

    let for_object: Vec<_> = monitors
        .iter()
        .filter(|monitor| monitor.object() == Some(fixture.objects[1]))
        .collect();
    assert_eq!(for_object.len(), 1);
    assert!(for_object[0].is_inflated());
    assert_eq!(monitors.len(), 3);
    assert_eq!(monitors[2], ObjectMonitor::Flat(flat));
}

#[test]
fn test_missing_thread_library_still_reports_flat_monitors()
{
    let fixture = fixture(false);
    let (session, events) = fixture.image.session(Some(fixture.vm));

    let monitors: Vec<_> = MonitorWalker::new(&session).unwrap().collect();
    assert_eq!(
        monitors,
        vec![ObjectMonitor::Flat(FlatMonitor {
            object: fixture.objects[0],
            lock_word: 0x40,
        })]
    );
    assert_eq!(events.fatal_count(), 1);
    assert_eq!(events.events()[0].walker, Some("MonitorWalker"));
}
