//! Controlled-vocabulary accessions and container format constants.
//!
//! The mzML accessions (`MS:...` integers) identify element types, payload
//! compressions, and binary array kinds inside the source document. The
//! `47...` range is private to the msz container and labels target codecs
//! and numeric transforms.

/* mzML element types */
pub const ACC_32_BIT_INTEGER: u32 = 1000519;
pub const ACC_16_BIT_FLOAT: u32 = 1000520;
pub const ACC_32_BIT_FLOAT: u32 = 1000521;
pub const ACC_64_BIT_INTEGER: u32 = 1000522;
pub const ACC_64_BIT_FLOAT: u32 = 1000523;

/* mzML payload compressions */
pub const ACC_ZLIB_COMPRESSION: u32 = 1000574;
pub const ACC_NO_COMPRESSION: u32 = 1000576;
/* recognised but unsupported numpress schemes */
pub const ACC_NUMPRESS_LINEAR: u32 = 1002312;
pub const ACC_NUMPRESS_PIC: u32 = 1002313;
pub const ACC_NUMPRESS_SLOF: u32 = 1002314;

/* binary array kinds */
pub const ACC_XML_STREAM: u32 = 1000513;
pub const ACC_MZ_ARRAY: u32 = 1000514;
pub const ACC_INTENSITY_ARRAY: u32 = 1000515;

/* target block codecs */
pub const ACC_CODEC_STORE: u32 = 4700000;
pub const ACC_CODEC_ZSTD: u32 = 4700001;

/* numeric transforms */
pub const ACC_TRANSFORM_LOSSLESS: u32 = 4700000;
pub const ACC_TRANSFORM_CAST_64_TO_32: u32 = 4700002;
pub const ACC_TRANSFORM_LOG2: u32 = 4700003;
pub const ACC_TRANSFORM_DELTA16: u32 = 4700004;
pub const ACC_TRANSFORM_DELTA24: u32 = 4700005;
pub const ACC_TRANSFORM_DELTA32: u32 = 4700006;
pub const ACC_TRANSFORM_VBR: u32 = 4700007;
pub const ACC_TRANSFORM_BITPACK: u32 = 4700008;
pub const ACC_TRANSFORM_VDELTA16: u32 = 4700009;
pub const ACC_TRANSFORM_VDELTA24: u32 = 4700010;
pub const ACC_TRANSFORM_CAST_64_TO_16: u32 = 4700011;
