// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM firmware update: PLDM type 5 package parsing
 *
 * Copyright (c) 2023 Code Construct
 */

use nom::{
    bytes::complete::take,
    combinator::{all_consuming, map, map_res},
    error::{Error as NomError, ErrorKind},
    multi::{count, length_count},
    number::complete::{le_u16, le_u32, le_u8},
    sequence::tuple,
    Finish, IResult,
};
use std::io::{BufReader, Read};
use std::os::unix::fs::FileExt;
use thiserror::Error;
use uuid::{uuid, Uuid};

use crate::{
    parse_string, parse_string_adjacent, ActivationMethods,
    ComponentClassification, Descriptor, DescriptorString, DeviceIdentifiers,
};

const PKG_UUID_1_0_X: Uuid = uuid!("f018878c-cb7d-4943-9800-a02f059aca02");
const PKG_UUID_1_1_X: Uuid = uuid!("1244d264-8d7d-4718-a030-fc8a56587d5a");
const PKG_UUID_1_2_X: Uuid = uuid!("3119ce2f-e80a-4a99-af6d-46f8b121f6bf");

type VResult<I, O> = IResult<I, O>;

/// Package parse or read failure
#[derive(Error, Debug)]
pub enum PldmPackageError {
    /// Reading the package file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The package contents are malformed
    #[error("PLDM package format error: {0}")]
    Format(String),
}

impl PldmPackageError {
    fn new_format(s: &str) -> Self {
        Self::Format(s.into())
    }
}

type Result<T> = std::result::Result<T, PldmPackageError>;

/// Package header format revision, identified by the header UUID
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PackageFormat {
    V1_0,
    V1_1,
    V1_2,
}

impl PackageFormat {
    fn from_uuid(u: &Uuid) -> Option<Self> {
        match *u {
            PKG_UUID_1_0_X => Some(Self::V1_0),
            PKG_UUID_1_1_X => Some(Self::V1_1),
            PKG_UUID_1_2_X => Some(Self::V1_2),
            _ => None,
        }
    }
}

/// Which package components apply to a device
#[derive(Debug, Clone)]
pub struct ComponentBitmap {
    n_bits: usize,
    bits: Vec<u8>,
}

impl<'a> ComponentBitmap {
    /// Parse a bitmap of `component_bits` bits
    pub fn parse(
        component_bits: u16,
    ) -> impl FnMut(&'a [u8]) -> VResult<&'a [u8], Self> {
        let bytes = component_bits.div_ceil(8);
        map(take(bytes), move |b: &[u8]| ComponentBitmap {
            n_bits: component_bits as usize,
            bits: b.to_vec(),
        })
    }

    /// Whether component `i` is selected
    pub fn bit(&self, i: usize) -> bool {
        self.bits
            .get(i / 8)
            .is_some_and(|b| b & (1 << (i % 8)) != 0)
    }

    /// Selected components, comma separated
    pub fn as_index_str(&self) -> String {
        self.as_index_vec()
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Selected component indices
    pub fn as_index_vec(&self) -> Vec<usize> {
        (0..self.n_bits).filter(|i| self.bit(*i)).collect()
    }
}

/// A firmware device (or downstream device) identification record
#[allow(missing_docs)]
#[derive(Debug)]
pub struct PackageDevice {
    pub ids: DeviceIdentifiers,
    pub option_flags: u32,
    pub version: DescriptorString,
    pub components: ComponentBitmap,
    pub package_data: Vec<u8>,
}

impl PackageDevice {
    /// Parse one record. `component_bits` is the package's bitmap length.
    pub fn parse(buf: &[u8], component_bits: u16) -> VResult<&[u8], Self> {
        const FIXED_LEN: u16 = 11;

        let (
            r,
            (len, desc_count, flags, set_ver_type, set_ver_len, pkg_data_len),
        ) = tuple((le_u16, le_u8, le_u32, le_u8, le_u8, le_u16))(buf)?;

        let Some(body_len) = len.checked_sub(FIXED_LEN) else {
            return Err(nom::Err::Failure(NomError::new(buf, ErrorKind::Verify)));
        };

        // split the record body from what follows
        let (rest, r) = take(body_len)(r)?;

        let (r, components) = ComponentBitmap::parse(component_bits)(r)?;
        let (r, set_ver) = parse_string(set_ver_type, set_ver_len)(r)?;
        let (r, ids) = count(Descriptor::parse, desc_count as usize)(r)?;
        let (_, package_data) = all_consuming(take(pkg_data_len))(r)?;

        let pkgdev = PackageDevice {
            ids: DeviceIdentifiers { ids },
            option_flags: flags,
            version: set_ver,
            components,
            package_data: package_data.to_vec(),
        };

        Ok((rest, pkgdev))
    }
}

/// A component image entry
#[derive(Debug)]
pub struct PackageComponent {
    /// Component classification
    pub classification: ComponentClassification,
    /// Component identifier, unique within a classification
    pub identifier: u16,
    /// Comparison stamp for version comparison by the device
    pub comparison_stamp: u32,
    /// Component options bits
    pub options: u16,
    /// Requested activation methods
    pub activation_method: ActivationMethods,
    /// Image location within the package file
    pub file_offset: usize,
    /// Image size
    pub file_size: usize,
    /// Component version string
    pub version: DescriptorString,
    /// Component opaque data, from 1.2.x packages
    pub opaque_data: Vec<u8>,
}

impl PackageComponent {
    /// Parse one component image information entry
    pub fn parse<'a>(
        format: PackageFormat,
    ) -> impl FnMut(&'a [u8]) -> VResult<&'a [u8], Self> {
        move |buf: &'a [u8]| {
            let (
                r,
                (
                    classification,
                    identifier,
                    comparison_stamp,
                    options,
                    activation_method,
                    file_offset,
                    file_size,
                    version,
                ),
            ) = tuple((
                le_u16,
                le_u16,
                le_u32,
                le_u16,
                le_u16,
                le_u32,
                le_u32,
                parse_string_adjacent,
            ))(buf)?;

            let (r, opaque_data) = if format >= PackageFormat::V1_2 {
                let (r, d) = nom::multi::length_data(le_u32)(r)?;
                (r, d.to_vec())
            } else {
                (r, Vec::new())
            };

            let c = PackageComponent {
                classification: classification.into(),
                identifier,
                comparison_stamp,
                options,
                activation_method: ActivationMethods::from_u16_truncated(
                    activation_method,
                ),
                file_offset: file_offset as usize,
                file_size: file_size as usize,
                version,
                opaque_data,
            };
            Ok((r, c))
        }
    }
}

/// A parsed firmware update package.
///
/// Only the headers are held in memory, component images are read from
/// the file on demand.
#[derive(Debug)]
pub struct Package {
    /// Header identifier
    pub identifier: Uuid,
    /// Header format revision
    pub format: PackageFormat,
    /// Package version string
    pub version: DescriptorString,
    /// Firmware device identification records
    pub devices: Vec<PackageDevice>,
    /// Downstream device identification records
    pub downstream_devices: Vec<PackageDevice>,
    /// Component images
    pub components: Vec<PackageComponent>,
    file: std::fs::File,
}

impl Package {
    /// Parse the package headers from `file`
    pub fn parse(file: std::fs::File) -> Result<Self> {
        // just enough length to retrieve the header size field, after which
        // we can parse the rest of the header.
        const HDR_INIT_SIZE: usize = 16 + 1 + 2;

        let mut reader = BufReader::new(&file);
        let mut init = [0u8; HDR_INIT_SIZE];
        reader.read_exact(&mut init)?;

        let (_, (identifier, _hdr_format, hdr_size)) = all_consuming(tuple((
            map_res(take::<_, _, NomError<_>>(16usize), Uuid::from_slice),
            le_u8,
            le_u16,
        )))(&init)
        .finish()
        .map_err(|_| PldmPackageError::new_format("can't parse header"))?;

        let format = PackageFormat::from_uuid(&identifier).ok_or_else(|| {
            PldmPackageError::Format(format!("unknown package UUID {identifier}"))
        })?;

        let hdr_usize = (hdr_size as usize)
            .checked_sub(HDR_INIT_SIZE)
            .ok_or(PldmPackageError::new_format("invalid header size"))?;

        let mut buf = vec![0u8; hdr_usize];
        reader.read_exact(&mut buf).map_err(|_| {
            PldmPackageError::new_format(
                "reported header size is larger than file",
            )
        })?;

        let (r, (_release_date_time, component_bitmap_length, version)) =
            tuple((take(13usize), le_u16, parse_string_adjacent))(buf.as_slice())
                .finish()
                .map_err(|_| {
                    PldmPackageError::new_format("can't parse header")
                })?;

        let f = |d| PackageDevice::parse(d, component_bitmap_length);
        let (r, devices) = length_count(le_u8, f)(r)
            .finish()
            .map_err(|_| PldmPackageError::new_format("can't parse devices"))?;

        // the downstream device identification area is present from 1.1.x
        let (r, downstream_devices) = if format >= PackageFormat::V1_1 {
            length_count(le_u8, f)(r).finish().map_err(|_| {
                PldmPackageError::new_format("can't parse downstream devices")
            })?
        } else {
            (r, Vec::new())
        };

        let (_, components) =
            length_count(le_u16, PackageComponent::parse(format))(r)
                .finish()
                .map_err(|_| {
                    PldmPackageError::new_format("can't parse components")
                })?;

        Ok(Package {
            identifier,
            format,
            version,
            devices,
            downstream_devices,
            components,
            file,
        })
    }

    /// Version string to offer in RequestUpdate: the first device record's
    /// image set version, else the package version.
    pub fn image_set_version(&self) -> &DescriptorString {
        self.devices
            .first()
            .map(|d| &d.version)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.version)
    }

    /// Read component data at `offset` into `buf`.
    ///
    /// Any part of `buf` beyond the end of the component image is zero
    /// filled. Returns the number of image bytes read.
    pub fn read_component(
        &self,
        component: &PackageComponent,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize> {
        let avail = component.file_size.saturating_sub(offset as usize);
        let n = avail.min(buf.len());
        let (data, pad) = buf.split_at_mut(n);
        let file_offset = offset as u64 + component.file_offset as u64;
        self.file.read_exact_at(data, file_offset)?;
        pad.fill(0);
        Ok(n)
    }

    /// Read a whole component image
    pub fn component_image(&self, component: &PackageComponent) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; component.file_size];
        self.read_component(component, 0, &mut buf)?;
        Ok(buf)
    }
}
