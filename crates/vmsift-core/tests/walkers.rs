//! Tests for the generic container walkers

mod common;

use common::ImageBuilder;
use vmsift_core::error::SiftError;
use vmsift_core::types::{Address, SegmentType};
use vmsift_core::walk::{Advance, ArrayWalker, LinkedWalker, PoolWalker, SegmentLink, SegmentWalker};

#[test]
fn test_array_walker_yields_slots_in_order()
{
    let mut image = ImageBuilder::new();
    let slots = [Address::from(0x1000), Address::NULL, Address::from(0x3000), Address::from(0x2000)];
    let array = image.pointer_array(&slots);
    let (session, events) = image.session(None);

    let mut walker = ArrayWalker::new(&session, array, slots.len() as u64);
    assert!(walker.has_more());
    assert_eq!(walker.len(), 4);
    assert_eq!(walker.next(), Some(Address::from(0x1000)));
    assert_eq!(walker.next(), Some(Address::from(0x3000)));
    assert!(walker.has_more());
    assert_eq!(walker.next(), Some(Address::from(0x2000)));
    assert!(!walker.has_more());
    assert_eq!(walker.next(), None);
    assert!(events.is_empty());
}

#[test]
fn test_advance_past_end_errors()
{
    let mut image = ImageBuilder::new();
    let array = image.pointer_array(&[Address::from(0x10)]);
    let (session, _) = image.session(None);

    let mut walker = ArrayWalker::new(&session, array, 1);
    assert_eq!(walker.advance(), Ok(Address::from(0x10)));
    assert_eq!(walker.advance(), Err(SiftError::NoMoreElements));
    assert!(matches!(walker.remove(), Err(SiftError::Unsupported(_))));
}

#[test]
fn test_segment_walker_filters_by_mask()
{
    let mut image = ImageBuilder::new();
    let (heap, _) = image.segment(SegmentType::OBJECT_HEAP, 64, 64);
    let (classes, _) = image.segment(SegmentType::CLASS_METADATA | SegmentType::FIXED, 64, 16);
    let (fixed, _) = image.segment(SegmentType::FIXED, 64, 0);
    let list = image.segment_list(&[heap, classes, fixed]);
    let (session, events) = image.session(None);

    let all: Vec<_> = SegmentWalker::from_segment_list(&session, list, SegmentType::ALL)
        .unwrap()
        .map(|segment| segment.address())
        .collect();
    assert_eq!(all, vec![heap, classes, fixed]);

    let metadata: Vec<_> = SegmentWalker::from_segment_list(&session, list, SegmentType::CLASS_METADATA)
        .unwrap()
        .collect();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].address(), classes);
    assert_eq!(metadata[0].region().size(), 16);

    let fixed_only = SegmentWalker::from_segment_list(&session, list, SegmentType::FIXED)
        .unwrap()
        .count();
    assert_eq!(fixed_only, 2);
    assert!(events.is_empty());
}

#[test]
fn test_segment_walker_null_head_is_empty()
{
    let image = ImageBuilder::new();
    let (session, events) = image.session(None);

    let mut walker = SegmentWalker::new(&session, Address::NULL, SegmentLink::Global, SegmentType::ALL).unwrap();
    assert_eq!(walker.next(), None);
    assert_eq!(walker.advance().unwrap_err(), SiftError::NoMoreElements);
    assert!(events.is_empty());
}

#[test]
fn test_segment_walker_stops_on_unreadable_link()
{
    let mut image = ImageBuilder::new();
    let (first, _) = image.segment(SegmentType::OBJECT_HEAP, 8, 8);
    image.set("MemorySegment", first, "nextSegment", 0xdead_0000);
    let (session, events) = image.session(None);

    let segments: Vec<_> = SegmentWalker::new(&session, first, SegmentLink::Global, SegmentType::ALL)
        .unwrap()
        .collect();
    // The bad node itself is skipped, then the chain ends.
    assert_eq!(segments.len(), 1);
    assert_eq!(events.len(), 2);
    assert_eq!(events.fatal_count(), 1);
    assert_eq!(events.events()[0].walker, Some("SegmentWalker"));
}

#[test]
fn test_class_loader_link_is_followed()
{
    let mut image = ImageBuilder::new();
    let (a, _) = image.segment(SegmentType::CLASS_METADATA, 8, 0);
    let (b, _) = image.segment(SegmentType::CLASS_METADATA, 8, 0);
    let (other, _) = image.segment(SegmentType::CLASS_METADATA, 8, 0);
    image.set_ptr("MemorySegment", a, "nextSegment", other);
    image.set_ptr("MemorySegment", a, "nextSegmentInClassLoader", b);
    let loader = image.alloc_struct("ClassLoader");
    image.set_ptr("ClassLoader", loader, "classSegments", a);
    let (session, _) = image.session(None);

    let owned: Vec<_> = SegmentWalker::from_class_loader(&session, loader, SegmentType::ALL)
        .unwrap()
        .map(|segment| segment.address())
        .collect();
    assert_eq!(owned, vec![a, b]);
}

#[test]
fn test_linked_walker_follows_named_field()
{
    let mut image = ImageBuilder::new();
    let first = image.alloc_struct("ClassLoader");
    let second = image.alloc_struct("ClassLoader");
    image.set_ptr("ClassLoader", first, "classSegments", second);
    let (session, _) = image.session(None);

    let nodes: Vec<_> = LinkedWalker::new(&session, "ClassLoader", "classSegments", first)
        .unwrap()
        .map(|node| node.address())
        .collect();
    assert_eq!(nodes, vec![first, second]);
}

#[test]
fn test_pool_walker_yields_used_elements()
{
    let mut image = ImageBuilder::new();
    let elements = image.alloc(8 * 40);
    let block = image.alloc_struct("PoolBlock");
    image.set_ptr("PoolBlock", block, "firstElement", elements);
    image.set("PoolBlock", block, "usedBitmap", 0b1001_0001);
    let pool = image.alloc_struct("Pool");
    image.set("Pool", pool, "elementSize", 40);
    image.set("Pool", pool, "elementsPerBlock", 8);
    image.set_ptr("Pool", pool, "firstBlock", block);
    let (session, _) = image.session(None);

    let walker = PoolWalker::new(&session, pool).unwrap();
    let used: Vec<_> = walker.collect();
    assert_eq!(used, vec![elements, elements + 4 * 40, elements + 7 * 40]);
}
