//! Hyperion flatbuffers messages (the `hyperionnet` schema).
//!
//! ```text
//! table Register { origin:string (required); priority:int; }
//! table RawImage { data:[ubyte]; width:int = -1; height:int = -1; }
//! union ImageType { RawImage }
//! table Image    { data:ImageType (required); duration:int = -1; }
//! union Command  { Color, Image, Clear, Register }
//! table Request  { command:Command (required); }
//!
//! table Reply    { error:string; video:int = -1; registered:int = -1; }
//! ```
//!
//! On the socket every message is a 4-byte big-endian length followed by the
//! finished buffer.

use flatbuffers::{
    FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Table, UnionWIPOffset,
    VOffsetT, Verifiable, Verifier, WIPOffset,
};

// Vtable slot of the n-th field is 4 + 2n. A union field takes two slots,
// its type tag first.
const FIELD_0: VOffsetT = 4;
const FIELD_1: VOffsetT = 6;
const FIELD_2: VOffsetT = 8;

const COMMAND_IMAGE: u8 = 2;
const COMMAND_REGISTER: u8 = 4;
const IMAGE_TYPE_RAW: u8 = 1;

/// `duration` of an image that stays until replaced.
const ENDLESS: i32 = -1;

/// Length-prefix size.
pub(crate) const HEADER_LEN: usize = 4;

/// Finish `Request { Register { origin, priority } }` in `fbb`.
pub(crate) fn build_register(fbb: &mut FlatBufferBuilder<'_>, origin: &str, priority: i32) {
    fbb.reset();
    let origin = fbb.create_string(origin);
    let start = fbb.start_table();
    fbb.push_slot_always::<WIPOffset<_>>(FIELD_0, origin);
    fbb.push_slot::<i32>(FIELD_1, priority, 0);
    let register = fbb.end_table(start);
    finish_request(fbb, COMMAND_REGISTER, register.as_union_value());
}

/// Finish `Request { Image { RawImage { rgb, width, height } } }` in `fbb`.
pub(crate) fn build_image(fbb: &mut FlatBufferBuilder<'_>, rgb: &[u8], width: i32, height: i32) {
    fbb.reset();
    let data = fbb.create_vector(rgb);
    let start = fbb.start_table();
    fbb.push_slot_always::<WIPOffset<_>>(FIELD_0, data);
    fbb.push_slot::<i32>(FIELD_1, width, -1);
    fbb.push_slot::<i32>(FIELD_2, height, -1);
    let raw = fbb.end_table(start);

    let start = fbb.start_table();
    fbb.push_slot::<u8>(FIELD_0, IMAGE_TYPE_RAW, 0);
    fbb.push_slot_always::<WIPOffset<_>>(FIELD_1, raw.as_union_value());
    fbb.push_slot::<i32>(FIELD_2, ENDLESS, -1);
    let image = fbb.end_table(start);
    finish_request(fbb, COMMAND_IMAGE, image.as_union_value());
}

fn finish_request(fbb: &mut FlatBufferBuilder<'_>, kind: u8, command: WIPOffset<UnionWIPOffset>) {
    let start = fbb.start_table();
    fbb.push_slot::<u8>(FIELD_0, kind, 0);
    fbb.push_slot_always::<WIPOffset<_>>(FIELD_1, command);
    let request = fbb.end_table(start);
    fbb.finish(request, None);
}

/// Prefix `message` with its length into `frame`.
pub(crate) fn frame(message: &[u8], frame: &mut Vec<u8>) {
    frame.clear();
    frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
    frame.extend_from_slice(message);
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// Server answer to one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Why the server rejected the request.
    pub error: Option<String>,
    /// Video mode the server switched to.
    pub video: Option<i32>,
    /// Priority the connection is registered at.
    pub registered: Option<i32>,
}

struct ReplyTable<'a>(Table<'a>);

impl<'a> Follow<'a> for ReplyTable<'a> {
    type Inner = ReplyTable<'a>;

    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        ReplyTable(Table::new(buf, loc))
    }
}

impl Verifiable for ReplyTable<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("error", FIELD_0, false)?
            .visit_field::<i32>("video", FIELD_1, false)?
            .visit_field::<i32>("registered", FIELD_2, false)?
            .finish();
        Ok(())
    }
}

/// Decode one `Reply` buffer (without its length prefix).
pub(crate) fn parse_reply(buf: &[u8]) -> Result<Reply, InvalidFlatbuffer> {
    let ReplyTable(table) = flatbuffers::root::<ReplyTable>(buf)?;
    // SAFETY: the verifier above checked each of these fields.
    let (error, video, registered) = unsafe {
        (
            table.get::<ForwardsUOffset<&str>>(FIELD_0, None),
            table.get::<i32>(FIELD_1, Some(-1)),
            table.get::<i32>(FIELD_2, Some(-1)),
        )
    };
    Ok(Reply {
        error: error.map(str::to_owned),
        video: video.filter(|v| *v != -1),
        registered: registered.filter(|r| *r != -1),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flatbuffers::Vector;

    /// A request as the server sees it.
    #[derive(Debug, PartialEq, Eq)]
    pub(crate) enum Decoded {
        Register { origin: String, priority: i32 },
        Image { data: Vec<u8>, width: i32, height: i32, duration: i32 },
        Other(u8),
    }

    pub(crate) fn decode_request(buf: &[u8]) -> Decoded {
        unsafe {
            let request = flatbuffers::root_unchecked::<Table>(buf);
            let kind = request.get::<u8>(FIELD_0, Some(0)).unwrap();
            let command = request.get::<ForwardsUOffset<Table>>(FIELD_1, None).unwrap();
            match kind {
                COMMAND_REGISTER => {
                    let origin = command.get::<ForwardsUOffset<&str>>(FIELD_0, None).unwrap();
                    Decoded::Register {
                        origin: origin.to_owned(),
                        priority: command.get::<i32>(FIELD_1, Some(0)).unwrap(),
                    }
                }
                COMMAND_IMAGE => {
                    assert_eq!(command.get::<u8>(FIELD_0, Some(0)), Some(IMAGE_TYPE_RAW));
                    let raw = command.get::<ForwardsUOffset<Table>>(FIELD_1, None).unwrap();
                    let data = raw.get::<ForwardsUOffset<Vector<u8>>>(FIELD_0, None).unwrap();
                    Decoded::Image {
                        data: data.bytes().to_vec(),
                        width: raw.get::<i32>(FIELD_1, Some(-1)).unwrap(),
                        height: raw.get::<i32>(FIELD_2, Some(-1)).unwrap(),
                        duration: command.get::<i32>(FIELD_2, Some(-1)).unwrap(),
                    }
                }
                other => Decoded::Other(other),
            }
        }
    }

    /// Length-prefixed `Reply` as the server sends it.
    pub(crate) fn reply_frame(error: Option<&str>, registered: i32) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let error = error.map(|e| fbb.create_string(e));
        let start = fbb.start_table();
        if let Some(error) = error {
            fbb.push_slot_always::<WIPOffset<_>>(FIELD_0, error);
        }
        fbb.push_slot::<i32>(FIELD_2, registered, -1);
        let reply = fbb.end_table(start);
        fbb.finish(reply, None);
        let mut out = Vec::new();
        frame(fbb.finished_data(), &mut out);
        out
    }

    #[test]
    fn register_carries_origin_and_priority() {
        let mut fbb = FlatBufferBuilder::new();
        build_register(&mut fbb, "webos", 150);
        assert_eq!(
            decode_request(fbb.finished_data()),
            Decoded::Register { origin: "webos".into(), priority: 150 }
        );
    }

    #[test]
    fn image_is_a_raw_image_without_expiry() {
        let mut fbb = FlatBufferBuilder::new();
        build_register(&mut fbb, "first", 1);
        // The builder is reused for every frame.
        build_image(&mut fbb, &[1, 2, 3, 4, 5, 6], 2, 1);
        assert_eq!(
            decode_request(fbb.finished_data()),
            Decoded::Image { data: vec![1, 2, 3, 4, 5, 6], width: 2, height: 1, duration: -1 }
        );
    }

    #[test]
    fn frame_prefixes_big_endian_length() {
        let mut out = vec![9, 9];
        frame(&[0xAA; 258], &mut out);
        assert_eq!(&out[..HEADER_LEN], &[0, 0, 1, 2]);
        assert_eq!(out.len(), HEADER_LEN + 258);
    }

    #[test]
    fn reply_fields_default_to_absent() {
        let ok = reply_frame(None, 150);
        assert_eq!(
            parse_reply(&ok[HEADER_LEN..]).unwrap(),
            Reply { error: None, video: None, registered: Some(150) }
        );

        let rejected = reply_frame(Some("Priority out of range"), -1);
        let reply = parse_reply(&rejected[HEADER_LEN..]).unwrap();
        assert_eq!(reply.error.as_deref(), Some("Priority out of range"));
        assert_eq!(reply.registered, None);
    }

    #[test]
    fn garbage_reply_is_rejected() {
        assert!(parse_reply(&[1, 2, 3]).is_err());
    }
}
