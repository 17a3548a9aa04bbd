use parking_lot::Mutex;

/// A binary image loaded into the host process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryImage {
    /// The load address of the image.
    pub address: u64,
    /// The size of the image in bytes.
    pub size: u64,
    /// The file name or path of the image.
    pub name: String,
    /// The debug identifier used for symbolication, if known.
    pub debug_id: Option<String>,
}

impl BinaryImage {
    /// Returns whether the given address falls into this image.
    ///
    /// The image covers the half-open interval `[address, address + size)`.
    fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.address.saturating_add(self.size)
    }
}

/// An address-ordered cache of the binary images loaded in the process.
///
/// Crash reporting collaborators insert and remove images as the dynamic
/// loader notifies them, and resolve instruction addresses to images when
/// symbolicating stack traces. Lookups and iteration always observe the
/// images in ascending address order, regardless of insertion order.
#[derive(Debug, Default)]
pub struct DebugImageCache {
    images: Mutex<Vec<BinaryImage>>,
}

impl DebugImageCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an image, keeping the cache sorted by address.
    ///
    /// An image already registered at the same address is replaced.
    pub fn insert(&self, image: BinaryImage) {
        let mut images = self.images.lock();
        match images.binary_search_by_key(&image.address, |existing| existing.address) {
            Ok(index) => images[index] = image,
            Err(index) => images.insert(index, image),
        }
    }

    /// Removes the image registered at the given load address.
    ///
    /// Removing an unknown address is a no-op.
    pub fn remove(&self, address: u64) {
        let mut images = self.images.lock();
        if let Ok(index) = images.binary_search_by_key(&address, |existing| existing.address) {
            images.remove(index);
        }
    }

    /// Returns the image containing the given address, if any.
    pub fn lookup(&self, address: u64) -> Option<BinaryImage> {
        let images = self.images.lock();

        // The candidate is the last image starting at or before the address.
        let index = match images.binary_search_by_key(&address, |existing| existing.address) {
            Ok(index) => index,
            Err(0) => return None,
            Err(index) => index - 1,
        };

        let image = &images[index];
        image.contains(address).then(|| image.clone())
    }

    /// Returns all images in ascending address order.
    pub fn images(&self) -> Vec<BinaryImage> {
        self.images.lock().clone()
    }

    /// Returns the number of cached images.
    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }
}
