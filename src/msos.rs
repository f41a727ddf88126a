//! Microsoft OS 2.0 descriptors so Windows binds WinUSB automatically,
//! without an .inf file, to the vendor interface this crate exposes.
//!
//! Grounded on the Microsoft OS 2.0 platform capability / descriptor set
//! layout Windows expects (BOS capability + GET_DESCRIPTOR_SET vendor
//! request); bModified to describe one vendor interface with a WINUSB
//! compatible ID and a registry property carrying the device interface
//! GUID host tooling (e.g. a gs_usb client library) can open the device
//! through.

/// Vendor request used to fetch the MS OS 2.0 descriptor set, chosen to
/// not collide with any `wire::Request` value.
pub const MS_VENDOR_CODE: u8 = 0x20;
/// `wIndex` value identifying the "descriptor set" sub-request.
pub const MS_GET_DESCRIPTOR_SET: u16 = 0x07;

const MS_OS_20_DESCRIPTOR_SET_HEADER: u16 = 0x0000;
const MS_OS_20_SUBSET_HEADER_CONFIGURATION: u16 = 0x0001;
const MS_OS_20_SUBSET_HEADER_FUNCTION: u16 = 0x0002;
const MS_OS_20_FEATURE_COMPATIBLE_ID: u16 = 0x0003;
const MS_OS_20_FEATURE_REG_PROPERTY: u16 = 0x0004;
const REG_PROPERTY_DATA_TYPE_MULTI_SZ: u16 = 0x0007;

/// A device interface GUID in the `"{xxxxxxxx-...}\0"` registry form
/// `DeviceInterfaceGUIDs` expects, including its trailing double NUL.
const DEVICE_INTERFACE_GUID: &str = "{7dae0a0f-1b5a-4a5e-9a5e-2f1b3c4d5e6f}\0\0";

/// Total size of the descriptor set this module writes; must match
/// `wTotalLength` fields below.
pub const DESCRIPTOR_SET_LEN: usize = 10 + 8 + 8 + 20 + 132;

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u16(&mut self, value: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&value.to_le_bytes());
        self.pos += 2;
    }

    fn u32(&mut self, value: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&value.to_le_bytes());
        self.pos += 4;
    }

    fn bytes(&mut self, value: &[u8]) {
        self.buf[self.pos..self.pos + value.len()].copy_from_slice(value);
        self.pos += value.len();
    }

    fn utf16(&mut self, value: &str) {
        for ch in value.encode_utf16() {
            self.u16(ch);
        }
    }
}

/// Writes the full MS OS 2.0 descriptor set (header, one configuration
/// subset, one function subset for interface 0, WINUSB compatible ID, and
/// the `DeviceInterfaceGUIDs` registry property) into `buf`.
///
/// `buf` must be at least [`DESCRIPTOR_SET_LEN`] bytes. Returns the number
/// of bytes written.
pub fn write_descriptor_set(buf: &mut [u8]) -> usize {
    let mut w = Writer::new(buf);

    // Descriptor set header.
    w.u16(10);
    w.u16(MS_OS_20_DESCRIPTOR_SET_HEADER);
    w.u32(0x0605_0000); // dwWindowsVersion: Windows 8.1+
    w.u16(DESCRIPTOR_SET_LEN as u16);

    // Configuration subset header (configuration index 0).
    w.u16(8);
    w.u16(MS_OS_20_SUBSET_HEADER_CONFIGURATION);
    w.bytes(&[0x00, 0x00]);
    w.u16((DESCRIPTOR_SET_LEN - 10) as u16);

    // Function subset header (first interface of the configuration).
    w.u16(8);
    w.u16(MS_OS_20_SUBSET_HEADER_FUNCTION);
    w.bytes(&[0x00, 0x00]);
    w.u16((DESCRIPTOR_SET_LEN - 10 - 8) as u16);

    // Compatible ID: WINUSB.
    w.u16(20);
    w.u16(MS_OS_20_FEATURE_COMPATIBLE_ID);
    w.bytes(b"WINUSB\0\0");
    w.bytes(&[0u8; 8]);

    // Registry property: DeviceInterfaceGUIDs -> our GUID, REG_MULTI_SZ.
    let name = "DeviceInterfaceGUIDs\0";
    let name_len = (name.encode_utf16().count() * 2) as u16;
    let value_len = (DEVICE_INTERFACE_GUID.encode_utf16().count() * 2) as u16;
    // wPropertyDataType + wPropertyNameLength + name + wPropertyDataLength + value.
    let prop_len = 2 + 2 + name_len + 2 + value_len;
    w.u16(prop_len + 4);
    w.u16(MS_OS_20_FEATURE_REG_PROPERTY);
    w.u16(REG_PROPERTY_DATA_TYPE_MULTI_SZ);
    w.u16(name_len);
    w.utf16(name);
    w.u16(value_len);
    w.utf16(DEVICE_INTERFACE_GUID);

    w.pos
}

/// Microsoft OS 2.0 platform capability UUID, fixed by the Microsoft spec.
const MS_OS_20_PLATFORM_UUID: [u8; 16] = [
    0xDF, 0x60, 0xDD, 0xD8, 0x89, 0x45, 0xC7, 0x4C, 0x9C, 0xD2, 0x65, 0x9D, 0x9E, 0x64, 0x8A, 0x9F,
];

/// Builds the BOS platform capability descriptor payload (everything
/// after `bDevCapabilityType`) advertising this device's MS OS 2.0
/// descriptor set, for `UsbClass::get_bos_descriptors`.
pub fn platform_capability() -> [u8; 25] {
    let mut out = [0u8; 25];
    out[0] = 0x00; // bReserved
    out[1..17].copy_from_slice(&MS_OS_20_PLATFORM_UUID);
    out[17..21].copy_from_slice(&0x0605_0000u32.to_le_bytes()); // dwWindowsVersion
    out[21..23].copy_from_slice(&(DESCRIPTOR_SET_LEN as u16).to_le_bytes()); // wMSOSDescriptorSetTotalLength
    out[23] = MS_VENDOR_CODE; // bMS_VendorCode
    out[24] = 0x00; // bAltEnumCode
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_set_length_matches_header_fields() {
        let mut buf = [0u8; DESCRIPTOR_SET_LEN];
        let written = write_descriptor_set(&mut buf);
        assert_eq!(written, DESCRIPTOR_SET_LEN);
        let total_length = u16::from_le_bytes([buf[8], buf[9]]);
        assert_eq!(total_length as usize, DESCRIPTOR_SET_LEN);
    }

    #[test]
    fn compatible_id_is_winusb() {
        let mut buf = [0u8; DESCRIPTOR_SET_LEN];
        write_descriptor_set(&mut buf);
        let offset = 10 + 8 + 8;
        assert_eq!(&buf[offset + 4..offset + 10], b"WINUSB");
    }
}
