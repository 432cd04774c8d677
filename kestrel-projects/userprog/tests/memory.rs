use kestrel::{KernelError, sync::SpinLock, thread::ThreadBuilder};
use kestrel_userprog::{
    frame_allocator::FrameAllocator,
    loader::stack_builder::StackBuilder,
    mm_struct::AddressSpace,
    page_table::{PageTable, PageTableMappingError, PteFlags},
};
use machine::{PAGE_SIZE, PhysicalMemory};
use std::{collections::BTreeSet, sync::Arc};

/// An address space of `pages` pages where the pages of `mapped` are backed
/// by fresh frames, with their read-only bit.
fn space(pages: usize, mapped: &[(usize, bool)]) -> (AddressSpace, Arc<FrameAllocator>) {
    let memory = Arc::new(PhysicalMemory::new(16));
    let frames = Arc::new(FrameAllocator::new(16));
    let mut aspace = AddressSpace::new(pages, memory, frames.clone());
    for (vpn, read_only) in mapped {
        let ppn = frames.acquire_frame().unwrap();
        aspace.map(*vpn, ppn, *read_only).unwrap();
    }
    (aspace, frames)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

mod frame_allocator {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let frames = FrameAllocator::new(4);
        assert_eq!(frames.total_frames(), 4);
        let a = frames.acquire_frame().unwrap();
        let b = frames.acquire_frame().unwrap();
        assert_ne!(a, b);
        assert_eq!(frames.free_frames(), 2);
        frames.release_frame(a);
        frames.release_frame(b);
        assert_eq!(frames.free_frames(), 4);
    }

    #[test]
    fn release_restores_the_free_list() {
        let frames = FrameAllocator::new(4);
        let a = frames.acquire_frame().unwrap();
        frames.release_frame(a);
        assert_eq!(frames.acquire_frame(), Ok(a));
        frames.release_frame(a);
        assert_eq!(frames.acquire_frames(4), Ok(vec![0, 1, 2, 3]));
    }

    #[test]
    fn exhaustion_is_not_fatal() {
        let frames = FrameAllocator::new(3);
        let taken = frames.acquire_frames(3).unwrap();
        assert_eq!(frames.acquire_frame(), Err(KernelError::NoMemory));
        assert_eq!(frames.free_frames(), 0);
        for frame in taken {
            frames.release_frame(frame);
        }
        assert_eq!(frames.free_frames(), 3);
        assert!(frames.acquire_frame().is_ok());
    }

    #[test]
    fn bulk_acquire_is_all_or_nothing() {
        let frames = FrameAllocator::new(5);
        let first = frames.acquire_frames(2).unwrap();
        assert_eq!(frames.acquire_frames(4), Err(KernelError::NoMemory));
        assert_eq!(frames.free_frames(), 3);
        let rest = frames.acquire_frames(3).unwrap();
        let all: BTreeSet<u32> = first.iter().chain(rest.iter()).copied().collect();
        assert_eq!(all, (0..5).collect());
    }

    #[test]
    fn concurrent_owners_are_disjoint() {
        let frames = Arc::new(FrameAllocator::new(32));
        let owned = Arc::new(SpinLock::new(BTreeSet::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (frames, owned) = (frames.clone(), owned.clone());
                ThreadBuilder::new("owner")
                    .spawn(move || {
                        for _ in 0..50 {
                            let mine = frames.acquire_frames(4).unwrap();
                            let mut guard = owned.lock();
                            for frame in mine.iter() {
                                assert!(guard.insert(*frame), "frame {frame} handed out twice");
                            }
                            guard.unlock();

                            let mut guard = owned.lock();
                            for frame in mine.iter() {
                                guard.remove(frame);
                            }
                            guard.unlock();
                            for frame in mine {
                                frames.release_frame(frame);
                            }
                        }
                    })
                    .unwrap()
            })
            .collect();
        for h in handles {
            assert_eq!(h.join(), 0);
        }
        assert_eq!(frames.free_frames(), 32);
    }
}

mod page_table {
    use super::*;

    #[test]
    fn map_and_translate() {
        let mut pt = PageTable::new(4);
        assert_eq!(pt.map(1, 7, PteFlags::empty()), Ok(()));
        assert_eq!(
            pt.map(1, 8, PteFlags::empty()),
            Err(PageTableMappingError::Duplicated)
        );
        assert_eq!(
            pt.map(4, 8, PteFlags::empty()),
            Err(PageTableMappingError::OutOfRange)
        );

        assert_eq!(pt.translate((PAGE_SIZE + 5) as u32), Ok((7, 5)));
        assert_eq!(pt.translate(5), Err(KernelError::BadAddress));
        assert_eq!(pt.translate((4 * PAGE_SIZE) as u32), Err(KernelError::BadAddress));
        assert_eq!(pt.translate(u32::MAX), Err(KernelError::BadAddress));

        let entry = pt.walk(1).unwrap();
        assert!(entry.is_valid());
        assert!(!entry.is_read_only());
        assert_eq!(pt.iter().count(), 1);
    }

    #[test]
    fn unmap_invalidates() {
        let mut pt = PageTable::new(2);
        pt.map(0, 3, PteFlags::READ_ONLY).unwrap();
        assert!(pt.walk(0).unwrap().is_read_only());
        assert_eq!(pt.unmap(0), Ok(3));
        assert_eq!(pt.unmap(0), Err(PageTableMappingError::NotExist));
        assert_eq!(pt.walk(0).err(), Some(PageTableMappingError::NotExist));
        assert_eq!(pt.walk(2).err(), Some(PageTableMappingError::OutOfRange));
        assert_eq!(pt.iter().count(), 0);
    }
}

mod address_space {
    use super::*;

    #[test]
    fn copy_within_a_page() {
        let (mut aspace, _frames) = space(2, &[(0, false), (1, false)]);
        assert_eq!(aspace.copy_out(10, b"hello"), 5);
        assert_eq!(aspace.copy_in(10, 5), b"hello");
        assert!(
            aspace
                .page_table()
                .walk(0)
                .unwrap()
                .flags
                .contains(PteFlags::DIRTY)
        );
        assert!(
            !aspace
                .page_table()
                .walk(1)
                .unwrap()
                .flags
                .intersects(PteFlags::DIRTY | PteFlags::USED)
        );
    }

    #[test]
    fn copy_across_pages() {
        let (mut aspace, _frames) = space(4, &[(0, false), (1, false), (2, false), (3, false)]);
        let data = pattern(2 * PAGE_SIZE + 100);
        let start = (PAGE_SIZE - 50) as u32;
        assert_eq!(aspace.copy_out(start, &data), data.len());
        assert_eq!(aspace.copy_in(start, data.len()), data);
        for (_, entry) in aspace.page_table().iter() {
            assert!(!entry.flags.contains(PteFlags::USED));
        }
    }

    #[test]
    fn copy_stops_at_unmapped_page() {
        let (mut aspace, _frames) = space(3, &[(0, false), (2, false)]);
        let data = pattern(200);
        let start = (PAGE_SIZE - 100) as u32;
        assert_eq!(aspace.copy_out(start, &data), 100);
        assert_eq!(aspace.copy_in(start, 200), &data[..100]);
        assert!(aspace.copy_in(PAGE_SIZE as u32, 1).is_empty());
        assert_eq!(aspace.copy_out((3 * PAGE_SIZE) as u32, b"x"), 0);
    }

    #[test]
    fn copy_out_stops_at_read_only_page() {
        let (mut aspace, _frames) = space(2, &[(0, false), (1, true)]);
        let data = pattern(64);
        let start = (PAGE_SIZE - 16) as u32;
        assert_eq!(aspace.copy_out(start, &data), 16);
        // Reading a read-only page is fine.
        assert_eq!(aspace.copy_in(start, 64).len(), 64);
        assert_eq!(aspace.write_word(PAGE_SIZE as u32, 1), Err(KernelError::BadAddress));
        assert!(
            !aspace
                .page_table()
                .walk(1)
                .unwrap()
                .flags
                .contains(PteFlags::DIRTY)
        );
    }

    #[test]
    fn copy_near_the_top_of_the_address_space() {
        let (mut aspace, _frames) = space(1, &[(0, false)]);
        assert!(aspace.copy_in(u32::MAX - 1, 8).is_empty());
        assert_eq!(aspace.copy_out(u32::MAX, b"ab"), 0);
        assert_eq!(aspace.read_word(u32::MAX - 2), Err(KernelError::BadAddress));
    }

    #[test]
    fn strings_and_words() {
        let (mut aspace, _frames) = space(2, &[(0, false), (1, false)]);
        let at = (PAGE_SIZE - 3) as u32;
        aspace.copy_out(at, b"file.txt\0");
        assert_eq!(aspace.read_cstring(at, 8).as_deref(), Some("file.txt"));
        assert_eq!(aspace.read_cstring(at, 7), None);
        assert_eq!(aspace.read_cstring(at + 8, 0).as_deref(), Some(""));

        aspace.copy_out(100, &[0xff, 0xfe, 0]);
        assert_eq!(aspace.read_cstring(100, 16), None);

        assert_eq!(aspace.write_word(at, -2), Ok(()));
        assert_eq!(aspace.read_word(at), Ok(-2));
        assert_eq!(aspace.copy_in(at, 4), (-2i32).to_le_bytes());
    }

    #[test]
    fn straddling_word_is_all_or_nothing() {
        let (mut aspace, _frames) = space(3, &[(0, false), (1, true)]);
        let at = (PAGE_SIZE - 2) as u32;
        aspace.copy_out(at, &[1, 2]);
        assert_eq!(aspace.write_word(at, -1), Err(KernelError::BadAddress));
        assert_eq!(aspace.copy_in(at, 2), [1, 2]);

        let (mut aspace, _frames) = space(3, &[(0, false)]);
        aspace.copy_out(at, &[1, 2]);
        assert_eq!(aspace.write_word(at, -1), Err(KernelError::BadAddress));
        assert_eq!(aspace.copy_in(at, 2), [1, 2]);
    }

    #[test]
    fn string_running_off_the_mapping() {
        let (mut aspace, _frames) = space(2, &[(0, false)]);
        let at = (PAGE_SIZE - 4) as u32;
        aspace.copy_out(at, b"abcd");
        assert_eq!(aspace.read_cstring(at, 64), None);
    }

    #[test]
    fn teardown_releases_every_frame() {
        let (mut aspace, frames) = space(4, &[(0, false), (1, true), (3, false)]);
        assert_eq!(frames.free_frames(), 13);
        aspace.teardown();
        assert_eq!(frames.free_frames(), 16);
        assert_eq!(aspace.page_table().iter().count(), 0);
        assert_eq!(aspace.translate(0), Err(KernelError::BadAddress));
        aspace.teardown();
        drop(aspace);
        assert_eq!(frames.free_frames(), 16);
    }

    #[test]
    fn drop_releases_every_frame() {
        let (aspace, frames) = space(2, &[(0, false), (1, false)]);
        drop(aspace);
        assert_eq!(frames.free_frames(), 16);
    }
}

mod stack_builder {
    use super::*;

    #[test]
    fn pushes_grow_downward() {
        let (mut aspace, _frames) = space(2, &[(0, false), (1, false)]);
        let top = (2 * PAGE_SIZE) as u32;
        let mut stack = StackBuilder::new(&mut aspace, top);
        let s = stack.push_str("hi").unwrap();
        assert_eq!(s, top - 3);
        stack.align(4);
        assert_eq!(stack.sp(), top - 4);
        let w = stack.push_word(0x1234).unwrap();
        assert_eq!(w, top - 8);
        let sp = stack.finish();
        assert_eq!(sp, top - 8);

        assert_eq!(aspace.read_cstring(s, 16).as_deref(), Some("hi"));
        assert_eq!(aspace.read_word(w), Ok(0x1234));
    }

    #[test]
    fn overflow_is_refused() {
        let (mut aspace, _frames) = space(2, &[(0, true), (1, false)]);
        let top = (2 * PAGE_SIZE) as u32;
        let mut stack = StackBuilder::new(&mut aspace, top);
        assert!(stack.push_bytes(&pattern(PAGE_SIZE)).is_ok());
        assert_eq!(stack.push_word(1), Err(KernelError::BadAddress));
        assert_eq!(stack.sp(), PAGE_SIZE as u32);

        let mut stack = StackBuilder::new(&mut aspace, 2);
        assert_eq!(stack.push_word(1), Err(KernelError::BadAddress));
        assert_eq!(stack.sp(), 2);
    }
}
