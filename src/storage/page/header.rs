use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;

/// The index header page persists a single field: the current root page id,
/// or `INVALID_PAGE_ID` when the tree is empty.
pub struct HeaderPage;

impl HeaderPage {
    pub fn root_page_id(data: &[u8]) -> PageId {
        LittleEndian::read_i32(&data[0..4])
    }

    pub fn set_root_page_id(data: &mut [u8], root: PageId) {
        LittleEndian::write_i32(&mut data[0..4], root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{INVALID_PAGE_ID, PAGE_SIZE};

    #[test]
    fn test_root_round_trip() {
        let mut data = [0u8; PAGE_SIZE];
        HeaderPage::set_root_page_id(&mut data, 17);
        assert_eq!(HeaderPage::root_page_id(&data), 17);

        HeaderPage::set_root_page_id(&mut data, INVALID_PAGE_ID);
        assert_eq!(HeaderPage::root_page_id(&data), INVALID_PAGE_ID);
    }
}
