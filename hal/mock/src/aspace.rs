//! Address spaces backed by host memory.
//!
//! Every region is a zeroed host allocation and the address handed back
//! is the host address, so code under test can dereference it like a user
//! pointer. A `Specific` placement is honoured in bookkeeping only: the
//! requested address is remembered and can be translated with
//! [`MockAddressSpaces::translate`].

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use helix_hal::mmu::{AddressSpaceId, AddressSpaceManager, MmuFlags, Placement, RegionRequest};
use helix_hal::{HalError, HalResult, VirtAddr, PAGE_SIZE};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One allocated region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRegion {
    /// Debug name given at allocation
    pub name: String,
    /// Address the caller asked for, if any
    pub requested: Option<VirtAddr>,
    /// Host address of the backing memory
    pub base: VirtAddr,
    /// Region size
    pub size: usize,
    /// Permissions
    pub flags: MmuFlags,
    layout: Layout,
}

#[derive(Debug)]
struct Space {
    name: String,
    regions: Vec<MockRegion>,
}

/// Host-memory [`AddressSpaceManager`]
#[derive(Debug)]
pub struct MockAddressSpaces {
    next_id: AtomicU64,
    spaces: Mutex<HashMap<u64, Space>>,
    active: Mutex<Option<AddressSpaceId>>,
    allocations: AtomicUsize,
    fail_create: AtomicBool,
    fail_allocate: AtomicBool,
}

impl MockAddressSpaces {
    /// Create a manager with no spaces
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            spaces: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            allocations: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_allocate: AtomicBool::new(false),
        }
    }

    /// Make every following `create` fail with `NoMemory`
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make every following `allocate` fail with `NoMemory`
    pub fn fail_allocate(&self, fail: bool) {
        self.fail_allocate.store(fail, Ordering::SeqCst);
    }

    /// Spaces created and not yet destroyed
    pub fn live_spaces(&self) -> usize {
        lock(&self.spaces).len()
    }

    /// Successful `allocate` calls so far
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Whether `space` still exists
    pub fn exists(&self, space: AddressSpaceId) -> bool {
        lock(&self.spaces).contains_key(&space.as_raw())
    }

    /// Name `space` was created with
    pub fn name_of(&self, space: AddressSpaceId) -> Option<String> {
        lock(&self.spaces).get(&space.as_raw()).map(|s| s.name.clone())
    }

    /// Regions of `space`, in allocation order
    pub fn regions(&self, space: AddressSpaceId) -> Vec<MockRegion> {
        lock(&self.spaces)
            .get(&space.as_raw())
            .map(|s| s.regions.clone())
            .unwrap_or_default()
    }

    /// Host address backing the user address `vaddr` of a region placed
    /// with `Placement::Specific`
    pub fn translate(&self, space: AddressSpaceId, vaddr: VirtAddr) -> Option<VirtAddr> {
        let spaces = lock(&self.spaces);
        spaces.get(&space.as_raw())?.regions.iter().find_map(|r| {
            let start = r.requested?;
            let offset = vaddr.as_usize().checked_sub(start.as_usize())?;
            (offset < r.size).then(|| r.base.add(offset))
        })
    }

    fn release(regions: Vec<MockRegion>) {
        for region in regions {
            // SAFETY: allocated in `allocate` with exactly this layout
            unsafe { alloc::dealloc(region.base.as_usize() as *mut u8, region.layout) };
        }
    }
}

impl Default for MockAddressSpaces {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockAddressSpaces {
    fn drop(&mut self) {
        let spaces = std::mem::take(&mut *lock(&self.spaces));
        for (_, space) in spaces {
            Self::release(space.regions);
        }
    }
}

impl AddressSpaceManager for MockAddressSpaces {
    fn create(&self, name: &str) -> HalResult<AddressSpaceId> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HalError::NoMemory);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.spaces).insert(
            id,
            Space {
                name: name.to_owned(),
                regions: Vec::new(),
            },
        );
        Ok(AddressSpaceId::from_raw(id))
    }

    fn destroy(&self, space: AddressSpaceId) -> HalResult<()> {
        let removed = lock(&self.spaces)
            .remove(&space.as_raw())
            .ok_or(HalError::NotFound)?;
        Self::release(removed.regions);

        let mut active = lock(&self.active);
        if *active == Some(space) {
            *active = None;
        }
        Ok(())
    }

    fn allocate(&self, space: AddressSpaceId, request: RegionRequest<'_>) -> HalResult<VirtAddr> {
        if self.fail_allocate.load(Ordering::SeqCst) {
            return Err(HalError::NoMemory);
        }
        if request.size == 0 {
            return Err(HalError::InvalidArgs);
        }

        let mut spaces = lock(&self.spaces);
        let target = spaces.get_mut(&space.as_raw()).ok_or(HalError::NotFound)?;

        let align = (1usize << request.align_log2).max(PAGE_SIZE);
        let layout = Layout::from_size_align(request.size, align).map_err(|_| HalError::InvalidArgs)?;
        // SAFETY: size checked non-zero above
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(HalError::NoMemory);
        }

        let requested = match request.placement {
            Placement::Anywhere => None,
            Placement::Specific(at) => Some(at),
        };
        let base = VirtAddr::new(ptr as usize);
        target.regions.push(MockRegion {
            name: request.name.to_owned(),
            requested,
            base,
            size: request.size,
            flags: request.flags,
            layout,
        });
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(base)
    }

    fn set_active(&self, space: Option<AddressSpaceId>) {
        *lock(&self.active) = space;
    }

    fn active(&self) -> Option<AddressSpaceId> {
        *lock(&self.active)
    }
}
