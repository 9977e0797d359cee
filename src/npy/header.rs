use byteorder::{ByteOrder as _, LittleEndian};
use num_traits::ToPrimitive;
use py_literal::{
    FormatError as PyValueFormatError, ParseError as PyValueParseError, Value as PyValue,
};
use std::error::Error;
use std::fmt;
use std::io;

/// Magic string to indicate npy format.
pub(crate) const MAGIC_STRING: &[u8] = b"\x93NUMPY";

/// Alignment of the full preamble (magic string, version, header length and
/// dictionary).
pub(crate) const HEADER_ALIGN: usize = 16;

#[derive(Debug)]
pub enum ParseHeaderError {
    MagicString,
    Version {
        major: u8,
        minor: u8,
    },
    /// Indicates that the array format string contains non-ASCII characters.
    /// This is an error for .npy format versions 1.0 and 2.0.
    NonAscii,
    /// Error parsing the array format string as UTF-8. This does not apply to
    /// .npy format versions 1.0 and 2.0, which require the array format string
    /// to be ASCII.
    Utf8Parse(std::str::Utf8Error),
    UnknownKey(PyValue),
    MissingKey(String),
    IllegalValue {
        key: String,
        value: PyValue,
    },
    /// The byte order character of the descriptor is not `<` or `|`.
    UnsupportedByteOrder(char),
    /// The descriptor string is not of the form `<order><kind><size>`.
    BadDescriptor(String),
    DictParse(PyValueParseError),
    MetaNotDict(PyValue),
    MissingNewline,
    /// The declared dictionary length runs past the end of the available
    /// bytes.
    Truncated {
        declared: usize,
        available: usize,
    },
}

impl Error for ParseHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        use ParseHeaderError::*;
        match self {
            Utf8Parse(err) => Some(err),
            DictParse(err) => Some(err),
            MagicString
            | Version { .. }
            | NonAscii
            | UnknownKey(_)
            | MissingKey(_)
            | IllegalValue { .. }
            | UnsupportedByteOrder(_)
            | BadDescriptor(_)
            | MetaNotDict(_)
            | MissingNewline
            | Truncated { .. } => None,
        }
    }
}

impl fmt::Display for ParseHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ParseHeaderError::*;
        match self {
            MagicString => write!(f, "start does not match magic string"),
            Version { major, minor } => write!(f, "unknown version number: {}.{}", major, minor),
            NonAscii => write!(f, "non-ascii in array format string; this is not supported in .npy format versions 1.0 and 2.0"),
            Utf8Parse(err) => write!(f, "error parsing array format string as UTF-8: {}", err),
            UnknownKey(key) => write!(f, "unknown key: {}", key),
            MissingKey(key) => write!(f, "missing key: {}", key),
            IllegalValue { key, value } => write!(f, "illegal value for key {}: {}", key, value),
            UnsupportedByteOrder(order) => write!(f, "unsupported byte order {:?}; only little-endian data is supported", order),
            BadDescriptor(descr) => write!(f, "malformed type descriptor: {:?}", descr),
            DictParse(err) => write!(f, "error parsing metadata dict: {}", err),
            MetaNotDict(value) => write!(f, "metadata is not a dict: {}", value),
            MissingNewline => write!(f, "newline missing at end of header"),
            Truncated { declared, available } => write!(
                f,
                "header declares {} bytes of metadata but only {} are available",
                declared, available
            ),
        }
    }
}

impl From<std::str::Utf8Error> for ParseHeaderError {
    fn from(err: std::str::Utf8Error) -> ParseHeaderError {
        ParseHeaderError::Utf8Parse(err)
    }
}

impl From<PyValueParseError> for ParseHeaderError {
    fn from(err: PyValueParseError) -> ParseHeaderError {
        ParseHeaderError::DictParse(err)
    }
}

#[derive(Debug)]
pub enum ReadHeaderError {
    Io(io::Error),
    Parse(ParseHeaderError),
}

impl Error for ReadHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadHeaderError::Io(err) => Some(err),
            ReadHeaderError::Parse(err) => Some(err),
        }
    }
}

impl fmt::Display for ReadHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadHeaderError::Io(err) => write!(f, "I/O error: {}", err),
            ReadHeaderError::Parse(err) => write!(f, "error parsing header: {}", err),
        }
    }
}

impl From<io::Error> for ReadHeaderError {
    fn from(err: io::Error) -> ReadHeaderError {
        ReadHeaderError::Io(err)
    }
}

impl From<ParseHeaderError> for ReadHeaderError {
    fn from(err: ParseHeaderError) -> ReadHeaderError {
        ReadHeaderError::Parse(err)
    }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Version {
    V1_0,
    V2_0,
    V3_0,
}

impl Version {
    /// Number of bytes taken up by version number (1 byte for major version, 1
    /// byte for minor version).
    const VERSION_NUM_BYTES: usize = 2;

    fn from_bytes(bytes: &[u8]) -> Result<Self, ParseHeaderError> {
        debug_assert_eq!(bytes.len(), Self::VERSION_NUM_BYTES);
        match (bytes[0], bytes[1]) {
            (0x01, 0x00) => Ok(Version::V1_0),
            (0x02, 0x00) => Ok(Version::V2_0),
            (0x03, 0x00) => Ok(Version::V3_0),
            (major, minor) => Err(ParseHeaderError::Version { major, minor }),
        }
    }

    /// Major version number.
    fn major_version(&self) -> u8 {
        match *self {
            Version::V1_0 => 1,
            Version::V2_0 => 2,
            Version::V3_0 => 3,
        }
    }

    /// Minor version number.
    fn minor_version(&self) -> u8 {
        0
    }

    /// Number of bytes in representation of header length.
    fn header_len_num_bytes(&self) -> usize {
        match *self {
            Version::V1_0 => 2,
            Version::V2_0 | Version::V3_0 => 4,
        }
    }

    /// Number of bytes before the dictionary text.
    fn prefix_len(&self) -> usize {
        MAGIC_STRING.len() + Self::VERSION_NUM_BYTES + self.header_len_num_bytes()
    }

    /// Decodes the header length from exactly `header_len_num_bytes()` bytes.
    fn decode_header_len(&self, bytes: &[u8]) -> usize {
        match *self {
            Version::V1_0 => LittleEndian::read_u16(bytes) as usize,
            Version::V2_0 | Version::V3_0 => LittleEndian::read_u32(bytes) as usize,
        }
    }

    /// Read header length.
    fn read_header_len<R: io::Read>(&self, mut reader: R) -> Result<usize, io::Error> {
        let mut buf = [0; 4];
        let buf = &mut buf[..self.header_len_num_bytes()];
        reader.read_exact(buf)?;
        Ok(self.decode_header_len(buf))
    }

    /// Format header length as bytes for writing to file.
    fn format_header_len(&self, header_len: usize) -> Vec<u8> {
        let mut out = vec![0; self.header_len_num_bytes()];
        match *self {
            Version::V1_0 => {
                assert!(header_len <= u16::MAX as usize);
                LittleEndian::write_u16(&mut out, header_len as u16);
            }
            Version::V2_0 | Version::V3_0 => {
                assert!(header_len <= u32::MAX as usize);
                LittleEndian::write_u32(&mut out, header_len as u32);
            }
        }
        out
    }
}

#[derive(Debug)]
pub enum FormatHeaderError {
    PyValue(PyValueFormatError),
    /// The metadata does not fit in any supported header version.
    HeaderTooLong(usize),
}

impl Error for FormatHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FormatHeaderError::PyValue(err) => Some(err),
            FormatHeaderError::HeaderTooLong(_) => None,
        }
    }
}

impl fmt::Display for FormatHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FormatHeaderError::PyValue(err) => write!(f, "error formatting Python value: {}", err),
            FormatHeaderError::HeaderTooLong(len) => {
                write!(f, "header of {} bytes is too long to be represented", len)
            }
        }
    }
}

impl From<PyValueFormatError> for FormatHeaderError {
    fn from(err: PyValueFormatError) -> FormatHeaderError {
        FormatHeaderError::PyValue(err)
    }
}

#[derive(Debug)]
pub enum WriteHeaderError {
    Io(io::Error),
    Format(FormatHeaderError),
}

impl Error for WriteHeaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WriteHeaderError::Io(err) => Some(err),
            WriteHeaderError::Format(err) => Some(err),
        }
    }
}

impl fmt::Display for WriteHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WriteHeaderError::Io(err) => write!(f, "I/O error: {}", err),
            WriteHeaderError::Format(err) => write!(f, "error formatting header: {}", err),
        }
    }
}

impl From<io::Error> for WriteHeaderError {
    fn from(err: io::Error) -> WriteHeaderError {
        WriteHeaderError::Io(err)
    }
}

impl From<FormatHeaderError> for WriteHeaderError {
    fn from(err: FormatHeaderError) -> WriteHeaderError {
        WriteHeaderError::Format(err)
    }
}

/// Byte order character of a type descriptor.
///
/// `Big` can be written (by big-endian hosts) but is rejected when parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// `<`
    Little,
    /// `>`
    Big,
    /// `|`, used for single-byte types where byte order does not apply.
    NotApplicable,
}

impl ByteOrder {
    pub fn as_char(self) -> char {
        match self {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        }
    }
}

/// The `descr` entry of the header: byte order, one-character type code and
/// element width in bytes (e.g. `<i4`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub byte_order: ByteOrder,
    pub kind: char,
    pub word_size: usize,
}

impl TypeDescriptor {
    pub fn new(byte_order: ByteOrder, kind: char, word_size: usize) -> TypeDescriptor {
        TypeDescriptor {
            byte_order,
            kind,
            word_size,
        }
    }

    /// Parses a descriptor string such as `<f8` or `|b1`.
    pub fn parse(descr: &str) -> Result<TypeDescriptor, ParseHeaderError> {
        let mut chars = descr.chars();
        let byte_order = match chars.next() {
            Some('<') => ByteOrder::Little,
            Some('|') => ByteOrder::NotApplicable,
            Some(other) => return Err(ParseHeaderError::UnsupportedByteOrder(other)),
            None => return Err(ParseHeaderError::BadDescriptor(descr.to_owned())),
        };
        let kind = match chars.next() {
            Some(kind) if kind.is_ascii_alphabetic() => kind,
            _ => return Err(ParseHeaderError::BadDescriptor(descr.to_owned())),
        };
        let word_size = match chars.as_str().parse::<usize>() {
            Ok(size) if size > 0 => size,
            _ => return Err(ParseHeaderError::BadDescriptor(descr.to_owned())),
        };
        Ok(TypeDescriptor {
            byte_order,
            kind,
            word_size,
        })
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.byte_order.as_char(), self.kind, self.word_size)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub type_descriptor: TypeDescriptor,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let mut text = Vec::new();
        self.write_dict(&mut text).map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&text))
    }
}

impl Header {
    /// Number of elements described by the shape (1 for a scalar).
    pub fn num_elements(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &len| acc.checked_mul(len))
    }

    /// Number of bytes of element data described by the header.
    pub fn num_bytes(&self) -> Option<usize> {
        self.num_elements()?
            .checked_mul(self.type_descriptor.word_size)
    }

    fn from_py_value(value: PyValue) -> Result<Self, ParseHeaderError> {
        if let PyValue::Dict(dict) = value {
            let mut type_descriptor: Option<TypeDescriptor> = None;
            let mut fortran_order: Option<bool> = None;
            let mut shape: Option<Vec<usize>> = None;
            for (key, value) in dict {
                match key {
                    PyValue::String(ref k) if k == "descr" => {
                        if let PyValue::String(ref descr) = value {
                            type_descriptor = Some(TypeDescriptor::parse(descr)?);
                        } else {
                            return Err(ParseHeaderError::IllegalValue {
                                key: "descr".to_owned(),
                                value,
                            });
                        }
                    }
                    PyValue::String(ref k) if k == "fortran_order" => {
                        if let PyValue::Boolean(b) = value {
                            fortran_order = Some(b);
                        } else {
                            return Err(ParseHeaderError::IllegalValue {
                                key: "fortran_order".to_owned(),
                                value,
                            });
                        }
                    }
                    PyValue::String(ref k) if k == "shape" => {
                        fn parse_shape(value: &PyValue) -> Option<Vec<usize>> {
                            value
                                .as_tuple()?
                                .iter()
                                .map(|elem| elem.as_integer()?.to_usize())
                                .collect()
                        }
                        if let Some(s) = parse_shape(&value) {
                            shape = Some(s);
                        } else {
                            return Err(ParseHeaderError::IllegalValue {
                                key: "shape".to_owned(),
                                value,
                            });
                        }
                    }
                    k => return Err(ParseHeaderError::UnknownKey(k)),
                }
            }
            match (type_descriptor, fortran_order, shape) {
                (Some(type_descriptor), Some(fortran_order), Some(shape)) => Ok(Header {
                    type_descriptor,
                    fortran_order,
                    shape,
                }),
                (None, _, _) => Err(ParseHeaderError::MissingKey("descr".to_owned())),
                (_, None, _) => Err(ParseHeaderError::MissingKey("fortran_order".to_owned())),
                (_, _, None) => Err(ParseHeaderError::MissingKey("shape".to_owned())),
            }
        } else {
            Err(ParseHeaderError::MetaNotDict(value))
        }
    }

    /// Parses the dictionary text (including its trailing newline).
    fn from_dict_bytes(version: Version, buf: &[u8]) -> Result<Self, ParseHeaderError> {
        let without_newline = match buf.split_last() {
            Some((&b'\n', rest)) => rest,
            Some(_) | None => return Err(ParseHeaderError::MissingNewline),
        };
        let header_str = match version {
            Version::V1_0 | Version::V2_0 => {
                if without_newline.is_ascii() {
                    // ASCII strings are always valid UTF-8.
                    std::str::from_utf8(without_newline)?
                } else {
                    return Err(ParseHeaderError::NonAscii);
                }
            }
            Version::V3_0 => std::str::from_utf8(without_newline)?,
        };
        let header_dict: PyValue = header_str.parse()?;
        Header::from_py_value(header_dict)
    }

    /// Parses the header at the start of `bytes`.
    ///
    /// Returns the header and the length of the full preamble, i.e. the
    /// offset of the first byte of element data.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), ParseHeaderError> {
        let fixed = MAGIC_STRING.len() + Version::VERSION_NUM_BYTES;
        if bytes.len() < MAGIC_STRING.len() || &bytes[..MAGIC_STRING.len()] != MAGIC_STRING {
            return Err(ParseHeaderError::MagicString);
        }
        if bytes.len() < fixed {
            return Err(ParseHeaderError::Truncated {
                declared: fixed,
                available: bytes.len(),
            });
        }
        let version = Version::from_bytes(&bytes[MAGIC_STRING.len()..fixed])?;
        let prefix_len = version.prefix_len();
        if bytes.len() < prefix_len {
            return Err(ParseHeaderError::Truncated {
                declared: prefix_len,
                available: bytes.len(),
            });
        }
        let header_len = version.decode_header_len(&bytes[fixed..prefix_len]);
        let dict = &bytes[prefix_len..];
        if dict.len() < header_len {
            return Err(ParseHeaderError::Truncated {
                declared: header_len,
                available: dict.len(),
            });
        }
        let header = Header::from_dict_bytes(version, &dict[..header_len])?;
        Ok((header, prefix_len + header_len))
    }

    /// Reads the header from `reader`, leaving it positioned at the first
    /// byte of element data.
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn from_reader<R: io::Read>(mut reader: R) -> Result<(Self, usize), ReadHeaderError> {
        // Check for magic string.
        let mut buf = vec![0; MAGIC_STRING.len()];
        reader.read_exact(&mut buf)?;
        if buf != MAGIC_STRING {
            return Err(ParseHeaderError::MagicString.into());
        }

        // Get version number.
        let mut buf = [0; Version::VERSION_NUM_BYTES];
        reader.read_exact(&mut buf)?;
        let version = Version::from_bytes(&buf)?;

        // Get `HEADER_LEN`.
        let header_len = version.read_header_len(&mut reader)?;

        // Parse the dictionary describing the array's format.
        let mut buf = vec![0; header_len];
        reader.read_exact(&mut buf)?;
        let header = Header::from_dict_bytes(version, &buf)?;
        Ok((header, version.prefix_len() + header_len))
    }

    /// Writes the dictionary in the spelling numpy uses, including the
    /// trailing `, }`. Values are formatted by `py_literal`.
    fn write_dict(&self, out: &mut Vec<u8>) -> Result<(), FormatHeaderError> {
        out.extend_from_slice(b"{'descr': ");
        PyValue::String(self.type_descriptor.to_string()).write_ascii(out)?;
        out.extend_from_slice(b", 'fortran_order': ");
        PyValue::Boolean(self.fortran_order).write_ascii(out)?;
        out.extend_from_slice(b", 'shape': ");
        PyValue::Tuple(
            self.shape
                .iter()
                .map(|&elem| PyValue::Integer(elem.into()))
                .collect(),
        )
        .write_ascii(out)?;
        out.extend_from_slice(b", }");
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatHeaderError> {
        // Metadata describing array's format as ASCII string.
        let mut arr_format = Vec::new();
        self.write_dict(&mut arr_format)?;

        // Length of a '\n' char in bytes.
        const NEWLINE_LEN: usize = 1;

        // Determine appropriate version based on minimum number of bytes needed to
        // represent header length (including final newline and worst-case
        // padding).
        let padded_max = arr_format.len() + NEWLINE_LEN + HEADER_ALIGN;
        let version = if padded_max > u16::MAX as usize {
            Version::V2_0
        } else {
            Version::V1_0
        };
        if padded_max > u32::MAX as usize {
            return Err(FormatHeaderError::HeaderTooLong(padded_max));
        }
        let prefix_len = version.prefix_len();

        // Add padding spaces to make total header length divisible by 16.
        for _ in 0..padding_len(prefix_len + arr_format.len() + NEWLINE_LEN) {
            arr_format.push(b' ');
        }
        // Add final newline.
        arr_format.push(b'\n');

        // Determine length of header.
        let header_len = arr_format.len();

        let mut out = Vec::with_capacity(prefix_len + header_len);
        out.extend_from_slice(MAGIC_STRING);
        out.push(version.major_version());
        out.push(version.minor_version());
        out.extend_from_slice(&version.format_header_len(header_len));
        out.extend_from_slice(&arr_format);

        // Verify that length of header is divisible by 16.
        debug_assert_eq!(out.len() % HEADER_ALIGN, 0);

        Ok(out)
    }

    pub fn write<W: io::Write>(&self, mut writer: W) -> Result<usize, WriteHeaderError> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

/// Number of padding spaces needed so that `unpadded_len` becomes a
/// multiple of `HEADER_ALIGN`.
fn padding_len(unpadded_len: usize) -> usize {
    (HEADER_ALIGN - unpadded_len % HEADER_ALIGN) % HEADER_ALIGN
}
