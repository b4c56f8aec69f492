#[cfg(test)]
pub mod test {
    use std::{sync::Arc, thread, time::Duration};

    use crate::{
        buffer::BufferPoolManager,
        storage::{
            disk::{MemoryDiskManager, WriteStatus},
            page::{page_constants::PAGE_SIZE, BasicPageGuard},
        },
        tests::init_logging,
    };

    fn memory_pool(pool_size: usize) -> (Arc<MemoryDiskManager>, BufferPoolManager) {
        init_logging();
        let disk = Arc::new(MemoryDiskManager::new());
        let bpm = BufferPoolManager::new(pool_size, disk.clone(), 2);
        (disk, bpm)
    }

    #[test]
    fn basic_guard_unpins_on_drop() {
        let (_, bpm) = memory_pool(2);

        let guard = bpm.new_page_guarded().unwrap();
        let page_id = guard.page_id();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        assert_eq!(bpm.is_dirty(page_id), Some(false));
        assert_eq!(bpm.evictable_count(), 1);
    }

    #[test]
    fn moved_guard_unpins_once() {
        let (_, bpm) = memory_pool(2);
        let (page_id, _) = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);

        let guard = bpm.fetch_page_basic(page_id).unwrap();
        let guards: Vec<BasicPageGuard<'_>> = vec![guard];
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        drop(guards);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn basic_guard_data_access() {
        let (_, bpm) = memory_pool(2);
        let mut guard = bpm.new_page_guarded().unwrap();
        let page_id = guard.page_id();

        guard.with_data_mut(|data| data[..4].copy_from_slice(&[1, 2, 3, 4]));
        assert!(guard.is_dirty());
        assert_eq!(guard.with_data(|data| data[3]), 4);

        guard.release();
        assert_eq!(bpm.is_dirty(page_id), Some(true));
    }

    #[test]
    fn write_guard_marks_dirty_only_on_mutation() {
        let (_, bpm) = memory_pool(2);
        let page_id = bpm.new_page_guarded().unwrap().page_id();

        let guard = bpm.fetch_page_write(page_id).unwrap();
        assert_eq!(guard[0], 0);
        assert!(!guard.is_dirty());
        drop(guard);
        assert_eq!(bpm.is_dirty(page_id), Some(false));

        let mut guard = bpm.fetch_page_write(page_id).unwrap();
        guard[0] = 42;
        assert!(guard.is_dirty());
        guard.release();
        assert_eq!(bpm.is_dirty(page_id), Some(true));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard[0], 42);
        assert_eq!(guard.len(), PAGE_SIZE);
    }

    #[test]
    fn readers_share_the_latch() {
        let (_, bpm) = memory_pool(2);
        let page_id = bpm.new_page_guarded().unwrap().page_id();

        let first = bpm.fetch_page_read(page_id).unwrap();
        let second = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
        assert_eq!(first[..], second[..]);

        // Flushing under a shared latch does not wait for it
        assert!(bpm.flush_page_sync(page_id).unwrap());

        drop(first);
        drop(second);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn writer_excludes_readers() {
        let (_, bpm) = memory_pool(2);
        let page_id = bpm.new_page_guarded().unwrap().page_id();

        let mut writer = bpm.fetch_page_write(page_id).unwrap();

        thread::scope(|s| {
            let reader = s.spawn(|| {
                let guard = bpm.fetch_page_read(page_id).unwrap();
                guard[0]
            });

            thread::sleep(Duration::from_millis(20));
            writer[0] = 7;
            writer.release();

            assert_eq!(reader.join().unwrap(), 7);
        });
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn upgrade_keeps_the_pin() {
        let (_, bpm) = memory_pool(2);

        let guard = bpm.new_page_guarded().unwrap();
        let page_id = guard.page_id();
        let mut writer = guard.upgrade_write();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        writer[..3].copy_from_slice(b"abc");
        drop(writer);

        let reader = bpm.fetch_page_basic(page_id).unwrap().upgrade_read();
        assert_eq!(&reader[..3], b"abc");
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(reader);

        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        assert_eq!(bpm.is_dirty(page_id), Some(true));
    }

    #[test]
    fn write_guard_flushes_while_latched() {
        let (disk, bpm) = memory_pool(2);
        let page_id = bpm.new_page_guarded().unwrap().page_id();

        let mut guard = bpm.fetch_page_write(page_id).unwrap();
        guard.fill(5);
        assert_eq!(guard.flush().wait(), WriteStatus::Success);
        assert!(!guard.is_dirty());
        drop(guard);

        assert_eq!(bpm.is_dirty(page_id), Some(false));
        assert_eq!(&disk.snapshot(page_id).unwrap()[..], &[5u8; PAGE_SIZE][..]);
    }

    #[test]
    fn guards_hold_pages_against_eviction() {
        let (_, bpm) = memory_pool(1);
        let guard = bpm.new_page_guarded().unwrap();

        assert!(bpm.new_page_guarded().is_err());
        drop(guard);
        assert!(bpm.new_page_guarded().is_ok());
    }
}
