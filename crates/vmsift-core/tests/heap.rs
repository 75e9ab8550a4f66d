//! Tests for heap scanning and the flat-monitor cache

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::ImageBuilder;
use vmsift_core::error::{SiftError, SiftResult};
use vmsift_core::heap::{HeaderObjectModel, HeapScanSink, HeapScanner, NullSink, ObjectModel, RegionMonitorCache, ScanState};
use vmsift_core::memory::MemoryAccessor;
use vmsift_core::session::AnalysisSession;
use vmsift_core::types::{Address, HeapRegion, SegmentType};

const OBJECT_SIZE: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Callback
{
    Start(u64),
    End(u64),
    Live(u64),
    Dead(u64),
    Corrupt,
}

/// Records callbacks as offsets from the region base
struct Recorder
{
    base: Address,
    calls: Vec<Callback>,
}

impl Recorder
{
    fn new(base: Address) -> Self
    {
        Self { base, calls: Vec::new() }
    }

    fn offset(&self, address: Address) -> u64
    {
        address.value() - self.base.value()
    }
}

impl HeapScanSink for Recorder
{
    fn section_start(&mut self, address: Address)
    {
        self.calls.push(Callback::Start(self.offset(address)));
    }

    fn section_end(&mut self, address: Address)
    {
        self.calls.push(Callback::End(self.offset(address)));
    }

    fn live_object(&mut self, object: Address, _size: u64)
    {
        self.calls.push(Callback::Live(self.offset(object)));
    }

    fn dead_object(&mut self, object: Address, _size: u64)
    {
        self.calls.push(Callback::Dead(self.offset(object)));
    }

    fn corrupt_data(&mut self, _error: &SiftError)
    {
        self.calls.push(Callback::Corrupt);
    }
}

/// Object model counting how many objects it was asked to size
struct CountingModel
{
    inner: HeaderObjectModel,
    sized: AtomicUsize,
}

impl CountingModel
{
    fn new(image: &ImageBuilder) -> Arc<Self>
    {
        Arc::new(Self {
            inner: HeaderObjectModel::from_schema(image.schema()).unwrap(),
            sized: AtomicUsize::new(0),
        })
    }

    fn sized(&self) -> usize
    {
        self.sized.load(Ordering::SeqCst)
    }
}

impl ObjectModel for CountingModel
{
    fn object_size(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<u64>
    {
        self.sized.fetch_add(1, Ordering::SeqCst);
        self.inner.object_size(memory, object)
    }

    fn is_live(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<bool>
    {
        self.inner.is_live(memory, object)
    }

    fn flat_lock_word(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<Option<u64>>
    {
        self.inner.flat_lock_word(memory, object)
    }

    fn inflated_monitor(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<Option<Address>>
    {
        self.inner.inflated_monitor(memory, object)
    }
}

/// Lay out `(live, lockword)` objects back to back in a new heap segment.
fn heap_segment(image: &mut ImageBuilder, objects: &[(bool, u64)]) -> (Address, HeapRegion)
{
    let used = OBJECT_SIZE * objects.len() as u64;
    let (segment, base) = image.segment(SegmentType::OBJECT_HEAP, used.max(8), used);
    for (index, (live, lock_word)) in objects.iter().enumerate() {
        let object = base + index as u64 * OBJECT_SIZE;
        image.set("Object", object, "size", OBJECT_SIZE);
        image.set("Object", object, "flags", u64::from(*live));
        image.set("Object", object, "lockword", *lock_word);
    }
    (segment, HeapRegion::new(base, base + used))
}

fn vm_with_segments(image: &mut ImageBuilder, segments: &[Address]) -> Address
{
    let list = image.segment_list(segments);
    let vm = image.alloc_struct("JavaVM");
    image.set_ptr("JavaVM", vm, "memorySegments", list);
    vm
}

#[test]
fn test_heap_trace_sections()
{
    let mut image = ImageBuilder::new();
    let (_, region) = heap_segment(&mut image, &[(false, 0), (true, 0), (true, 0), (false, 0), (true, 0)]);
    let (session, events) = image.session(None);

    let mut recorder = Recorder::new(region.base);
    let scan = HeapScanner::new(&session).scan_region(region, &mut recorder).unwrap();

    use Callback::{Dead, End, Live, Start};
    assert_eq!(
        recorder.calls,
        vec![
            Dead(0),
            Start(32),
            Live(32),
            Live(64),
            End(96),
            Dead(96),
            Start(128),
            Live(128),
            End(160),
        ]
    );
    assert_eq!(scan.objects, 5);
    assert_eq!(scan.state, ScanState::Finished);
    assert!(events.is_empty());
}

#[test]
fn test_trailing_dead_object_closes_at_its_own_address()
{
    let mut image = ImageBuilder::new();
    let (_, region) = heap_segment(&mut image, &[(true, 0), (false, 0)]);
    let (session, _) = image.session(None);

    let mut recorder = Recorder::new(region.base);
    let scan = HeapScanner::new(&session).scan_region(region, &mut recorder).unwrap();

    use Callback::{Dead, End, Live, Start};
    assert_eq!(recorder.calls, vec![Start(0), Live(0), End(32), Dead(32), End(32)]);
    assert_eq!(scan.state, ScanState::Finished);
}

fn closing_ends(calls: &[Callback]) -> usize
{
    let last_object = calls
        .iter()
        .rposition(|call| matches!(call, Callback::Live(_) | Callback::Dead(_)))
        .unwrap();
    calls[last_object + 1..]
        .iter()
        .filter(|call| matches!(call, Callback::End(_)))
        .count()
}

#[test]
fn test_final_object_emits_exactly_one_closing_section()
{
    use Callback::{Dead, End, Live, Start};

    // Last object live: closed at its end.
    let mut image = ImageBuilder::new();
    let (_, region) = heap_segment(&mut image, &[(false, 0), (true, 0), (true, 0)]);
    let (session, _) = image.session(None);
    let mut recorder = Recorder::new(region.base);
    HeapScanner::new(&session).scan_region(region, &mut recorder).unwrap();
    assert_eq!(recorder.calls, vec![Dead(0), Start(32), Live(32), Live(64), End(96)]);
    assert_eq!(closing_ends(&recorder.calls), 1);

    // Last object dead inside a dead run: closed at its start.
    let mut image = ImageBuilder::new();
    let (_, region) = heap_segment(&mut image, &[(true, 0), (false, 0), (false, 0)]);
    let (session, _) = image.session(None);
    let mut recorder = Recorder::new(region.base);
    HeapScanner::new(&session).scan_region(region, &mut recorder).unwrap();
    assert_eq!(
        recorder.calls,
        vec![Start(0), Live(0), End(32), Dead(32), Dead(64), End(64)]
    );
    assert_eq!(closing_ends(&recorder.calls), 1);
}

#[test]
fn test_empty_region_reports_nothing()
{
    let mut image = ImageBuilder::new();
    let base = image.alloc(8);
    let (session, _) = image.session(None);

    let mut recorder = Recorder::new(base);
    let scan = HeapScanner::new(&session)
        .scan_region(HeapRegion::new(base, base), &mut recorder)
        .unwrap();
    assert!(recorder.calls.is_empty());
    assert_eq!(scan.objects, 0);
    assert_eq!(scan.state, ScanState::Finished);
}

#[test]
fn test_corrupt_object_closes_section_and_keeps_monitors()
{
    let mut image = ImageBuilder::new();
    let (_, region) = heap_segment(&mut image, &[(true, 0x40), (true, 0), (true, 0)]);
    // Second object claims a size smaller than its header.
    image.set("Object", region.base + OBJECT_SIZE, "size", 4);
    let (session, events) = image.session(None);

    let mut recorder = Recorder::new(region.base);
    let scan = HeapScanner::new(&session).scan_region(region, &mut recorder).unwrap();

    use Callback::{Corrupt, End, Live, Start};
    assert_eq!(recorder.calls, vec![Start(0), Live(0), End(32), Corrupt]);
    assert_ne!(scan.state, ScanState::Finished);
    assert_eq!(scan.objects, 1);
    assert_eq!(scan.flat_monitors.len(), 1);
    assert_eq!(scan.flat_monitors[0].object, region.base);
    assert_eq!(events.fatal_count(), 1);
    assert_eq!(events.events()[0].walker, Some("HeapScanner"));
    assert!(session.monitor_cache().contains(&region));
}

#[test]
fn test_region_cache_memoizes_scans()
{
    let mut image = ImageBuilder::new();
    let (first, first_region) = heap_segment(&mut image, &[(true, 0x40), (false, 0x80), (true, 0)]);
    let (second, _) = heap_segment(&mut image, &[(true, 0x100), (true, 0x201)]);
    let (classes, _) = image.segment(SegmentType::CLASS_METADATA, 16, 16);
    let vm = vm_with_segments(&mut image, &[first, classes, second]);

    let model = CountingModel::new(&image);
    let cache = Arc::new(RegionMonitorCache::new());
    let build = || {
        AnalysisSession::builder(Arc::new(image.memory()), image.schema().clone())
            .vm(vm)
            .object_model(model.clone())
            .monitor_cache(cache.clone())
            .build()
    };

    let session = build();
    let scanner = HeapScanner::new(&session);
    assert_eq!(scanner.regions().unwrap().len(), 2);

    // Dead objects and inflated lock words are not flat monitors.
    let flats = scanner.all_flat_monitors().unwrap();
    let lock_words: Vec<_> = flats.iter().map(|flat| flat.lock_word).collect();
    assert_eq!(lock_words, vec![0x40, 0x100]);
    assert_eq!(model.sized(), 5);
    assert_eq!(cache.len(), 2);

    assert_eq!(scanner.all_flat_monitors().unwrap(), flats);
    assert_eq!(model.sized(), 5);

    // A second session over the same cache does not rescan either.
    let other = build();
    assert_eq!(HeapScanner::new(&other).all_flat_monitors().unwrap(), flats);
    assert_eq!(model.sized(), 5);

    // Only uncached regions are scanned.
    let fresh = Arc::new(RegionMonitorCache::new());
    fresh.insert_if_absent(first_region, Vec::new());
    let partial = AnalysisSession::builder(Arc::new(image.memory()), image.schema().clone())
        .vm(vm)
        .object_model(model.clone())
        .monitor_cache(fresh)
        .build();
    let flats = HeapScanner::new(&partial).all_flat_monitors().unwrap();
    assert_eq!(flats.len(), 1);
    assert_eq!(model.sized(), 7);
}

#[test]
fn test_scan_without_object_model_fails()
{
    let image = ImageBuilder::with_schema(vmsift_core::schema::ImageSchema::builder(8).build());
    let (session, _) = image.session(None);
    let region = HeapRegion::new(Address::from(0x1000), Address::from(0x2000));
    assert!(matches!(
        HeapScanner::new(&session).scan_region(region, &mut NullSink),
        Err(SiftError::MissingStructure(_))
    ));
}
