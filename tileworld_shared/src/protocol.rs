//! Message payloads.
//!
//! Layouts are fixed little-endian binary. Coordinates are `f32`, entity ids
//! and array/string lengths are `u32`, strings are UTF-8 and collision state
//! is a single byte. Decoding rejects truncated payloads and trailing bytes.

use anyhow::{bail, Context};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    component::CollisionState,
    ecs::Entity,
    math::Vec2,
    net::{self, MessageId},
};

/// Entity id + position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityPosition {
    pub id: Entity,
    pub position: Vec2,
}

/// One entry of a Move batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityMove {
    pub id: Entity,
    pub position: Vec2,
    pub cstate: CollisionState,
}

/// Sent to a freshly connected client.
#[derive(Debug, Clone, PartialEq)]
pub struct Initial {
    pub player: Entity,
    pub level: String,
    pub position: Vec2,
    /// Everything else already present in `level`.
    pub entities: Vec<EntityPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Create {
    pub id: Entity,
    pub position: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delete {
    pub id: Entity,
}

/// The reporting client's own body state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub position: Vec2,
    pub cstate: CollisionState,
}

/// Per-tick batch of entities that moved in one level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MoveBatch {
    pub entities: Vec<EntityMove>,
}

/// Interact with the named object in the sender's level.
#[derive(Debug, Clone, PartialEq)]
pub struct Use {
    pub which: String,
}

/// Moves the receiving player into another level.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub level: String,
    pub position: Vec2,
    /// Snapshot of the destination level, traveler excluded.
    pub entities: Vec<EntityPosition>,
}

/// A payload with a fixed message id.
pub trait Packet: Sized {
    const ID: MessageId;

    fn write(&self, buf: &mut BytesMut);

    fn read(buf: &mut Bytes) -> anyhow::Result<Self>;

    /// Full frame: header + payload.
    fn encode(&self) -> anyhow::Result<Bytes> {
        let mut payload = BytesMut::new();
        self.write(&mut payload);
        net::build(Self::ID as u16, &payload).with_context(|| format!("encode {:?}", Self::ID))
    }

    /// Decodes a payload (header already stripped).
    fn decode(mut payload: Bytes) -> anyhow::Result<Self> {
        let value = Self::read(&mut payload).with_context(|| format!("decode {:?}", Self::ID))?;
        if payload.has_remaining() {
            bail!("{} trailing bytes after {:?}", payload.remaining(), Self::ID);
        }
        Ok(value)
    }
}

fn need(buf: &Bytes, n: usize, what: &str) -> anyhow::Result<()> {
    if buf.remaining() < n {
        bail!("truncated {what}: need {n} bytes, have {}", buf.remaining());
    }
    Ok(())
}

fn get_u8(buf: &mut Bytes, what: &str) -> anyhow::Result<u8> {
    need(buf, 1, what)?;
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut Bytes, what: &str) -> anyhow::Result<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32_le())
}

/// Coordinates on the wire must be finite.
fn get_f32(buf: &mut Bytes, what: &str) -> anyhow::Result<f32> {
    need(buf, 4, what)?;
    let v = buf.get_f32_le();
    if !v.is_finite() {
        bail!("non-finite {what}: {v}");
    }
    Ok(v)
}

fn get_vec2(buf: &mut Bytes) -> anyhow::Result<Vec2> {
    Ok(Vec2::new(get_f32(buf, "x")?, get_f32(buf, "y")?))
}

fn get_entity(buf: &mut Bytes) -> anyhow::Result<Entity> {
    Ok(Entity(get_u32(buf, "entity id")?))
}

fn get_cstate(buf: &mut Bytes) -> anyhow::Result<CollisionState> {
    let raw = get_u8(buf, "collision state")?;
    CollisionState::from_wire(raw).with_context(|| format!("invalid collision state {raw}"))
}

fn get_string(buf: &mut Bytes) -> anyhow::Result<String> {
    let len = get_u32(buf, "string length")? as usize;
    need(buf, len, "string")?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).context("string is not UTF-8")
}

/// Reads a `u32` count of fixed-size entries, refusing counts that cannot fit.
fn get_count(buf: &mut Bytes, entry_size: usize) -> anyhow::Result<usize> {
    let count = get_u32(buf, "array length")? as usize;
    if count.saturating_mul(entry_size) > buf.remaining() {
        bail!("array of {count} entries does not fit in {} bytes", buf.remaining());
    }
    Ok(count)
}

fn put_vec2(buf: &mut BytesMut, v: Vec2) {
    buf.put_f32_le(v.x);
    buf.put_f32_le(v.y);
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

const ENTITY_POSITION_SIZE: usize = 12;
const ENTITY_MOVE_SIZE: usize = 13;

fn put_positions(buf: &mut BytesMut, entities: &[EntityPosition]) {
    buf.put_u32_le(entities.len() as u32);
    for e in entities {
        buf.put_u32_le(e.id.0);
        put_vec2(buf, e.position);
    }
}

fn get_positions(buf: &mut Bytes) -> anyhow::Result<Vec<EntityPosition>> {
    let count = get_count(buf, ENTITY_POSITION_SIZE)?;
    let mut entities = Vec::with_capacity(count);
    for _ in 0..count {
        let id = get_entity(buf)?;
        let position = get_vec2(buf)?;
        entities.push(EntityPosition { id, position });
    }
    Ok(entities)
}

impl Packet for Initial {
    const ID: MessageId = MessageId::Initial;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.player.0);
        put_string(buf, &self.level);
        put_vec2(buf, self.position);
        put_positions(buf, &self.entities);
    }

    fn read(buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(Self {
            player: get_entity(buf)?,
            level: get_string(buf)?,
            position: get_vec2(buf)?,
            entities: get_positions(buf)?,
        })
    }
}

impl Packet for Create {
    const ID: MessageId = MessageId::Create;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id.0);
        put_vec2(buf, self.position);
    }

    fn read(buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(Self {
            id: get_entity(buf)?,
            position: get_vec2(buf)?,
        })
    }
}

impl Packet for Delete {
    const ID: MessageId = MessageId::Delete;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id.0);
    }

    fn read(buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(Self { id: get_entity(buf)? })
    }
}

impl Packet for Position {
    const ID: MessageId = MessageId::Position;

    fn write(&self, buf: &mut BytesMut) {
        put_vec2(buf, self.position);
        buf.put_u8(self.cstate.to_wire());
    }

    fn read(buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(Self {
            position: get_vec2(buf)?,
            cstate: get_cstate(buf)?,
        })
    }
}

impl Packet for MoveBatch {
    const ID: MessageId = MessageId::Move;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.entities.len() as u32);
        for e in &self.entities {
            buf.put_u32_le(e.id.0);
            put_vec2(buf, e.position);
            buf.put_u8(e.cstate.to_wire());
        }
    }

    fn read(buf: &mut Bytes) -> anyhow::Result<Self> {
        let count = get_count(buf, ENTITY_MOVE_SIZE)?;
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            entities.push(EntityMove {
                id: get_entity(buf)?,
                position: get_vec2(buf)?,
                cstate: get_cstate(buf)?,
            });
        }
        Ok(Self { entities })
    }
}

impl Packet for Use {
    const ID: MessageId = MessageId::Use;

    fn write(&self, buf: &mut BytesMut) {
        put_string(buf, &self.which);
    }

    fn read(buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(Self { which: get_string(buf)? })
    }
}

impl Packet for Transfer {
    const ID: MessageId = MessageId::Transfer;

    fn write(&self, buf: &mut BytesMut) {
        put_string(buf, &self.level);
        put_vec2(buf, self.position);
        put_positions(buf, &self.entities);
    }

    fn read(buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(Self {
            level: get_string(buf)?,
            position: get_vec2(buf)?,
            entities: get_positions(buf)?,
        })
    }
}

/// Any decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum NetMsg {
    Move(MoveBatch),
    Create(Create),
    Delete(Delete),
    Initial(Initial),
    Position(Position),
    Use(Use),
    Transfer(Transfer),
}

impl NetMsg {
    /// Verifies a whole frame and decodes its payload.
    pub fn decode(frame: Bytes) -> anyhow::Result<NetMsg> {
        let msg = net::parse(frame)?;
        let Some(kind) = msg.kind() else {
            bail!("unknown message id {}", msg.id);
        };
        Ok(match kind {
            MessageId::Move => NetMsg::Move(MoveBatch::decode(msg.payload)?),
            MessageId::Create => NetMsg::Create(Create::decode(msg.payload)?),
            MessageId::Delete => NetMsg::Delete(Delete::decode(msg.payload)?),
            MessageId::Initial => NetMsg::Initial(Initial::decode(msg.payload)?),
            MessageId::Position => NetMsg::Position(Position::decode(msg.payload)?),
            MessageId::Use => NetMsg::Use(Use::decode(msg.payload)?),
            MessageId::Transfer => NetMsg::Transfer(Transfer::decode(msg.payload)?),
        })
    }

    pub fn encode(&self) -> anyhow::Result<Bytes> {
        match self {
            NetMsg::Move(m) => m.encode(),
            NetMsg::Create(m) => m.encode(),
            NetMsg::Delete(m) => m.encode(),
            NetMsg::Initial(m) => m.encode(),
            NetMsg::Position(m) => m.encode(),
            NetMsg::Use(m) => m.encode(),
            NetMsg::Transfer(m) => m.encode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::HEADER_SIZE;

    #[test]
    fn transfer_layout_is_bit_exact() {
        let msg = Transfer {
            level: "b".into(),
            position: Vec2::new(1.0, 2.0),
            entities: vec![EntityPosition {
                id: Entity(7),
                position: Vec2::new(0.5, -1.0),
            }],
        };
        let frame = msg.encode().unwrap();
        let mut expected = vec![6, 0, 29, 0];
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b'b');
        expected.extend_from_slice(&1.0f32.to_le_bytes());
        expected.extend_from_slice(&2.0f32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&7u32.to_le_bytes());
        expected.extend_from_slice(&0.5f32.to_le_bytes());
        expected.extend_from_slice(&(-1.0f32).to_le_bytes());
        assert_eq!(&frame[..], &expected[..]);
        assert_eq!(NetMsg::decode(frame).unwrap(), NetMsg::Transfer(msg));
    }

    #[test]
    fn move_batch_carries_collision_state() {
        let batch = MoveBatch {
            entities: vec![
                EntityMove {
                    id: Entity(1),
                    position: Vec2::new(10.0, 20.0),
                    cstate: CollisionState::Ladder,
                },
                EntityMove {
                    id: Entity(2),
                    position: Vec2::new(-3.0, 4.5),
                    cstate: CollisionState::Air,
                },
            ],
        };
        let frame = batch.encode().unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + 4 + 2 * ENTITY_MOVE_SIZE);
        assert_eq!(NetMsg::decode(frame).unwrap(), NetMsg::Move(batch));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut payload = BytesMut::new();
        Delete { id: Entity(3) }.write(&mut payload);
        payload.put_u8(0);
        assert!(Delete::decode(payload.freeze()).is_err());
    }

    #[test]
    fn decode_rejects_truncated_and_invalid_fields() {
        // Position cut short before the collision state byte.
        let mut payload = BytesMut::new();
        put_vec2(&mut payload, Vec2::new(1.0, 1.0));
        assert!(Position::decode(payload.clone().freeze()).is_err());

        payload.put_u8(9);
        assert!(Position::decode(payload.freeze()).is_err());

        // String length pointing past the end.
        let mut payload = BytesMut::new();
        payload.put_u32_le(10);
        payload.put_slice(b"abc");
        assert!(Use::decode(payload.freeze()).is_err());

        let mut payload = BytesMut::new();
        payload.put_u32_le(2);
        payload.put_slice(&[0xff, 0xfe]);
        assert!(Use::decode(payload.freeze()).is_err());
    }

    #[test]
    fn non_finite_coordinates_are_refused() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let mut payload = BytesMut::new();
            put_vec2(&mut payload, Vec2::new(1.0, bad));
            payload.put_u8(CollisionState::Ground.to_wire());
            assert!(Position::decode(payload.freeze()).is_err(), "{bad}");
        }

        let mut payload = BytesMut::new();
        payload.put_u32_le(3);
        put_vec2(&mut payload, Vec2::new(f32::NAN, 0.0));
        assert!(Create::decode(payload.freeze()).is_err());
    }

    #[test]
    fn absurd_array_length_is_refused() {
        let mut payload = BytesMut::new();
        payload.put_u32_le(u32::MAX);
        assert!(MoveBatch::decode(payload.freeze()).is_err());
    }

    #[test]
    fn unknown_frame_id_fails_decode() {
        let frame = net::build(42, &[]).unwrap();
        assert!(NetMsg::decode(frame).is_err());
    }
}
