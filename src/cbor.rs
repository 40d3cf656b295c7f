// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CBOR wire format for parameters, keys, tokens and protocol messages.
//!
//! Every entity is a CBOR map with small integer keys. G1 and G2 elements are
//! compressed byte strings (48 and 96 bytes), scalars are 32-byte
//! little-endian strings. Decoding rejects points that are not in the
//! prime-order subgroup and scalars that are not reduced. A map with a key
//! its entity does not define is rejected, so decoding then encoding gives
//! back the same bytes.

use std::collections::BTreeMap;

use bls12_381::{G1Affine, G2Affine, Scalar};
use ciborium::value::Value;
use thiserror::Error;

use crate::credit_earn::{EarnCoupon, EarnRequest, EarnResponse};
use crate::issue_join::{JoinRequest, JoinResponse};
use crate::ledger::{DoubleSpendingTag, DsId, TRACE_DIGITS, TransactionIdentifier, TransactionRecord};
use crate::predicate::{PointsPredicate, PointsSide, SpendDeductLeaf, SpendDeductTree};
use crate::setup::{
    ProviderKeyPair, ProviderPublicKey, ProviderSecretKey, PublicParameters, StoreKeyPair,
    StorePublicKey, StoreSecretKey, UserKeyPair, UserPublicKey, UserSecretKey,
};
use crate::spend_deduct::{SpendRequest, SpendResponse};
use crate::spseq::{SpsEqPublicKey, SpsEqSecretKey, SpsEqSignature};
use crate::token::{PromotionParameters, Token};
use crate::zkp::{CompositeProof, ProofNode};

#[derive(Debug, Error)]
pub enum CborError {
    #[error("CBOR decoding failed: {0:?}")]
    Ciborium(ciborium::de::Error<std::io::Error>),
    #[error("invalid CBOR structure: {0}")]
    InvalidStructure(&'static str),
    #[error("invalid field value: {0}")]
    InvalidValue(&'static str),
}

impl From<ciborium::de::Error<std::io::Error>> for CborError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        CborError::Ciborium(e)
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for CborError {
    fn from(_: ciborium::ser::Error<std::io::Error>) -> Self {
        CborError::InvalidStructure("serialization error")
    }
}

type CborResult<T> = Result<T, CborError>;

fn encode_g1(point: &G1Affine) -> Value {
    Value::Bytes(point.to_compressed().to_vec())
}

fn encode_g2(point: &G2Affine) -> Value {
    Value::Bytes(point.to_compressed().to_vec())
}

fn encode_scalar(scalar: &Scalar) -> Value {
    Value::Bytes(scalar.to_bytes().to_vec())
}

fn encode_g1s(points: &[G1Affine]) -> Value {
    Value::Array(points.iter().map(encode_g1).collect())
}

fn encode_scalars(scalars: &[Scalar]) -> Value {
    Value::Array(scalars.iter().map(encode_scalar).collect())
}

fn encode_u64(n: u64) -> Value {
    Value::Integer(n.into())
}

fn fixed<const N: usize>(value: Value, what: &'static str) -> CborResult<[u8; N]> {
    match value {
        Value::Bytes(bytes) => bytes
            .try_into()
            .map_err(|_| CborError::InvalidStructure(what)),
        _ => Err(CborError::InvalidStructure(what)),
    }
}

fn decode_g1(value: Value) -> CborResult<G1Affine> {
    let bytes = fixed::<48>(value, "expected 48-byte string for G1 element")?;
    Option::from(G1Affine::from_compressed(&bytes))
        .ok_or(CborError::InvalidValue("invalid G1 element"))
}

fn decode_g2(value: Value) -> CborResult<G2Affine> {
    let bytes = fixed::<96>(value, "expected 96-byte string for G2 element")?;
    Option::from(G2Affine::from_compressed(&bytes))
        .ok_or(CborError::InvalidValue("invalid G2 element"))
}

fn decode_scalar(value: Value) -> CborResult<Scalar> {
    let bytes = fixed::<32>(value, "expected 32-byte string for scalar")?;
    Option::from(Scalar::from_bytes(&bytes)).ok_or(CborError::InvalidValue("non-canonical scalar"))
}

fn decode_array(value: Value) -> CborResult<Vec<Value>> {
    match value {
        Value::Array(values) => Ok(values),
        _ => Err(CborError::InvalidStructure("expected CBOR array")),
    }
}

fn decode_g1s(value: Value) -> CborResult<Vec<G1Affine>> {
    decode_array(value)?.into_iter().map(decode_g1).collect()
}

fn decode_scalars(value: Value) -> CborResult<Vec<Scalar>> {
    decode_array(value)?.into_iter().map(decode_scalar).collect()
}

fn decode_u64(value: Value) -> CborResult<u64> {
    match value {
        Value::Integer(i) => {
            u64::try_from(i).map_err(|_| CborError::InvalidValue("integer out of range"))
        }
        _ => Err(CborError::InvalidStructure("expected unsigned integer")),
    }
}

fn decode_usize(value: Value) -> CborResult<usize> {
    usize::try_from(decode_u64(value)?).map_err(|_| CborError::InvalidValue("integer out of range"))
}

fn decode_bytes(value: Value) -> CborResult<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        _ => Err(CborError::InvalidStructure("expected byte string")),
    }
}

/// A decoded map, indexed by its integer keys.
struct Fields(BTreeMap<u64, Value>);

impl Fields {
    fn new(value: Value) -> CborResult<Self> {
        let Value::Map(map) = value else {
            return Err(CborError::InvalidStructure("expected CBOR map"));
        };
        let mut fields = BTreeMap::new();
        for (k, v) in map {
            let key = decode_u64(k).map_err(|_| CborError::InvalidStructure("expected integer key"))?;
            if fields.insert(key, v).is_some() {
                return Err(CborError::InvalidStructure("duplicate map key"));
            }
        }
        Ok(Fields(fields))
    }

    /// Runs `read` over the map and rejects any key it leaves behind.
    fn decode<T>(value: Value, read: impl FnOnce(&mut Fields) -> CborResult<T>) -> CborResult<T> {
        let mut fields = Fields::new(value)?;
        let decoded = read(&mut fields)?;
        if !fields.0.is_empty() {
            return Err(CborError::InvalidStructure("unknown map key"));
        }
        Ok(decoded)
    }

    fn take(&mut self, key: u64, missing: &'static str) -> CborResult<Value> {
        self.0.remove(&key).ok_or(CborError::InvalidStructure(missing))
    }

    fn take_optional(&mut self, key: u64) -> Option<Value> {
        self.0.remove(&key)
    }
}

fn map(entries: Vec<(u64, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (encode_u64(k), v))
            .collect(),
    )
}

/// Conversion to and from a CBOR value, so entities nest inside messages.
trait CborValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> CborResult<Self>;
}

macro_rules! cbor_entity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                pub fn to_cbor(&self) -> Result<Vec<u8>, CborError> {
                    let mut bytes = Vec::new();
                    ciborium::into_writer(&self.to_value(), &mut bytes)?;
                    Ok(bytes)
                }

                pub fn from_cbor(bytes: &[u8]) -> Result<Self, CborError> {
                    let value: Value = ciborium::from_reader(bytes)?;
                    Self::from_value(value)
                }
            }
        )*
    };
}

cbor_entity!(
    PublicParameters,
    SpsEqSignature,
    SpsEqPublicKey,
    ProviderPublicKey,
    ProviderKeyPair,
    UserPublicKey,
    UserKeyPair,
    StorePublicKey,
    StoreKeyPair,
    PromotionParameters,
    Token,
    CompositeProof,
    JoinRequest,
    JoinResponse,
    EarnRequest,
    EarnResponse,
    EarnCoupon,
    SpendDeductTree,
    SpendRequest,
    SpendResponse,
    DoubleSpendingTag,
    TransactionRecord,
);

/// ```text
/// PublicParameters = { 1: w, 2: pedersen_g, 3: pedersen_h, 4: max_points_length, 5: range_bits }
/// ```
impl CborValue for PublicParameters {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_g1(&self.w)),
            (2, encode_g1(&self.pedersen_g)),
            (3, encode_g1(&self.pedersen_h)),
            (4, encode_u64(self.max_points_length as u64)),
            (5, encode_u64(u64::from(self.range_bits))),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let w = decode_g1(f.take(1, "missing field 1 (w)")?)?;
            let pedersen_g = decode_g1(f.take(2, "missing field 2 (pedersen_g)")?)?;
            let pedersen_h = decode_g1(f.take(3, "missing field 3 (pedersen_h)")?)?;
            let max_points_length = decode_usize(f.take(4, "missing field 4 (max_points_length)")?)?;
            let range_bits = u32::try_from(decode_u64(f.take(5, "missing field 5 (range_bits)")?)?)
                .map_err(|_| CborError::InvalidValue("range bits out of range"))?;
            let pp = PublicParameters::from_parts(w, pedersen_g, pedersen_h, max_points_length, range_bits);
            pp.validate()
                .map_err(|_| CborError::InvalidValue("public parameters"))?;
            Ok(pp)
        })
    }
}

/// ```text
/// SpsEqSignature = { 1: Z, 2: Y, 3: Yhat }
/// ```
impl CborValue for SpsEqSignature {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_g1(&self.z)),
            (2, encode_g1(&self.y)),
            (3, encode_g2(&self.y_hat)),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(SpsEqSignature {
                z: decode_g1(f.take(1, "missing field 1 (Z)")?)?,
                y: decode_g1(f.take(2, "missing field 2 (Y)")?)?,
                y_hat: decode_g2(f.take(3, "missing field 3 (Yhat)")?)?,
            })
        })
    }
}

impl CborValue for SpsEqPublicKey {
    fn to_value(&self) -> Value {
        map(vec![(1, Value::Array(self.x_hat.iter().map(encode_g2).collect()))])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let x_hat = decode_array(f.take(1, "missing field 1 (X)")?)?
                .into_iter()
                .map(decode_g2)
                .collect::<CborResult<_>>()?;
            Ok(SpsEqPublicKey { x_hat })
        })
    }
}

/// ```text
/// ProviderPublicKey = { 1: SpsEqPublicKey, 2: [* h] }
/// ```
impl CborValue for ProviderPublicKey {
    fn to_value(&self) -> Value {
        map(vec![(1, self.signing.to_value()), (2, encode_g1s(&self.h))])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(ProviderPublicKey {
                signing: SpsEqPublicKey::from_value(f.take(1, "missing field 1 (signing key)")?)?,
                h: decode_g1s(f.take(2, "missing field 2 (bases)")?)?,
            })
        })
    }
}

/// Key material for distribution to the provider itself. The pair is not
/// checked for consistency here; see [`ProviderKeyPair::validate`].
///
/// ```text
/// ProviderKeyPair = { 1: [* x], 2: [* q], 3: prf_key, 4: ProviderPublicKey }
/// ```
impl CborValue for ProviderKeyPair {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_scalars(&self.secret.signing.x)),
            (2, encode_scalars(&self.secret.q)),
            (3, Value::Bytes(self.secret.prf_key.to_vec())),
            (4, self.public.to_value()),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let x = decode_scalars(f.take(1, "missing field 1 (signing key)")?)?;
            let q = decode_scalars(f.take(2, "missing field 2 (trapdoors)")?)?;
            let prf_key = fixed::<32>(f.take(3, "missing field 3 (prf key)")?, "expected 32-byte PRF key")?;
            let public = ProviderPublicKey::from_value(f.take(4, "missing field 4 (public key)")?)?;
            Ok(ProviderKeyPair {
                secret: ProviderSecretKey {
                    signing: SpsEqSecretKey { x },
                    q,
                    prf_key,
                },
                public,
            })
        })
    }
}

impl CborValue for UserPublicKey {
    fn to_value(&self) -> Value {
        map(vec![(1, encode_g1(&self.upk))])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(UserPublicKey {
                upk: decode_g1(f.take(1, "missing field 1 (upk)")?)?,
            })
        })
    }
}

impl CborValue for UserKeyPair {
    fn to_value(&self) -> Value {
        map(vec![(1, encode_scalar(&self.secret.usk)), (2, encode_g1(&self.public.upk))])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(UserKeyPair {
                secret: UserSecretKey {
                    usk: decode_scalar(f.take(1, "missing field 1 (usk)")?)?,
                },
                public: UserPublicKey {
                    upk: decode_g1(f.take(2, "missing field 2 (upk)")?)?,
                },
            })
        })
    }
}

impl CborValue for StorePublicKey {
    fn to_value(&self) -> Value {
        map(vec![(1, encode_g1(&self.pk))])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(StorePublicKey {
                pk: decode_g1(f.take(1, "missing field 1 (pk)")?)?,
            })
        })
    }
}

impl CborValue for StoreKeyPair {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_scalar(&self.secret.x)),
            (2, Value::Bytes(self.secret.nonce_key.to_vec())),
            (3, encode_g1(&self.public.pk)),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let x = decode_scalar(f.take(1, "missing field 1 (x)")?)?;
            let nonce_key = fixed::<32>(f.take(2, "missing field 2 (nonce key)")?, "expected 32-byte nonce key")?;
            let pk = decode_g1(f.take(3, "missing field 3 (pk)")?)?;
            Ok(StoreKeyPair {
                secret: StoreSecretKey { x, nonce_key },
                public: StorePublicKey { pk },
            })
        })
    }
}

impl CborValue for PromotionParameters {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_scalar(&self.promotion_id)),
            (2, encode_u64(self.points_length as u64)),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let promotion_id = decode_scalar(f.take(1, "missing field 1 (promotion id)")?)?;
            let points_length = decode_usize(f.take(2, "missing field 2 (points length)")?)?;
            if points_length == 0 {
                return Err(CborError::InvalidValue("promotion without points"));
            }
            Ok(PromotionParameters {
                promotion_id,
                points_length,
            })
        })
    }
}

/// ```text
/// Token = { 1: C0, 2: C1, 3: esk, 4: dsrnd0, 5: dsrnd1, 6: z, 7: t,
///           8: promotion_id, 9: [* points], 10: SpsEqSignature }
/// ```
impl CborValue for Token {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_g1(&self.c0)),
            (2, encode_g1(&self.c1)),
            (3, encode_scalar(&self.esk)),
            (4, encode_scalar(&self.dsrnd0)),
            (5, encode_scalar(&self.dsrnd1)),
            (6, encode_scalar(&self.z)),
            (7, encode_scalar(&self.t)),
            (8, encode_scalar(&self.promotion_id)),
            (9, encode_scalars(&self.points)),
            (10, self.certificate.to_value()),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(Token {
                c0: decode_g1(f.take(1, "missing field 1 (C0)")?)?,
                c1: decode_g1(f.take(2, "missing field 2 (C1)")?)?,
                esk: decode_scalar(f.take(3, "missing field 3 (esk)")?)?,
                dsrnd0: decode_scalar(f.take(4, "missing field 4 (dsrnd0)")?)?,
                dsrnd1: decode_scalar(f.take(5, "missing field 5 (dsrnd1)")?)?,
                z: decode_scalar(f.take(6, "missing field 6 (z)")?)?,
                t: decode_scalar(f.take(7, "missing field 7 (t)")?)?,
                promotion_id: decode_scalar(f.take(8, "missing field 8 (promotion id)")?)?,
                points: decode_scalars(f.take(9, "missing field 9 (points)")?)?,
                certificate: SpsEqSignature::from_value(f.take(10, "missing field 10 (certificate)")?)?,
            })
        })
    }
}

const PROOF_AND: u64 = 0;
const PROOF_OR: u64 = 1;
const PROOF_LEAF: u64 = 2;

/// ```text
/// ProofNode = { 1: 0, 2: [* ProofNode] }                 ; AND
///           / { 1: 1, 2: [* ProofNode], 3: [* scalar] }  ; OR, one challenge per child
///           / { 1: 2, 3: [* scalar] }                    ; leaf responses
/// ```
impl CborValue for ProofNode {
    fn to_value(&self) -> Value {
        let children = |nodes: &[ProofNode]| Value::Array(nodes.iter().map(|n| n.to_value()).collect());
        match self {
            ProofNode::And(nodes) => map(vec![(1, encode_u64(PROOF_AND)), (2, children(nodes))]),
            ProofNode::Or {
                challenges,
                children: nodes,
            } => map(vec![
                (1, encode_u64(PROOF_OR)),
                (2, children(nodes)),
                (3, encode_scalars(challenges)),
            ]),
            ProofNode::Leaf { responses } => {
                map(vec![(1, encode_u64(PROOF_LEAF)), (3, encode_scalars(responses))])
            }
        }
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let children = |v: Value| -> CborResult<Vec<ProofNode>> {
                decode_array(v)?.into_iter().map(ProofNode::from_value).collect()
            };
            match decode_u64(f.take(1, "missing field 1 (node kind)")?)? {
                PROOF_AND => Ok(ProofNode::And(children(f.take(2, "missing field 2 (children)")?)?)),
                PROOF_OR => {
                    let nodes = children(f.take(2, "missing field 2 (children)")?)?;
                    let challenges = decode_scalars(f.take(3, "missing field 3 (challenges)")?)?;
                    if challenges.len() != nodes.len() {
                        return Err(CborError::InvalidStructure("OR node challenge count"));
                    }
                    Ok(ProofNode::Or {
                        challenges,
                        children: nodes,
                    })
                }
                PROOF_LEAF => Ok(ProofNode::Leaf {
                    responses: decode_scalars(f.take(3, "missing field 3 (responses)")?)?,
                }),
                _ => Err(CborError::InvalidValue("unknown proof node kind")),
            }
        })
    }
}

impl CborValue for CompositeProof {
    fn to_value(&self) -> Value {
        map(vec![(1, encode_scalar(&self.challenge)), (2, self.root.to_value())])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(CompositeProof {
                challenge: decode_scalar(f.take(1, "missing field 1 (challenge)")?)?,
                root: ProofNode::from_value(f.take(2, "missing field 2 (root)")?)?,
            })
        })
    }
}

/// ```text
/// JoinRequest = { 1: upk, 2: C0pre, 3: C1pre, 4: CompositeProof }
/// ```
impl CborValue for JoinRequest {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_g1(&self.upk)),
            (2, encode_g1(&self.c0_pre)),
            (3, encode_g1(&self.c1_pre)),
            (4, self.proof.to_value()),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(JoinRequest {
                upk: decode_g1(f.take(1, "missing field 1 (upk)")?)?,
                c0_pre: decode_g1(f.take(2, "missing field 2 (C0pre)")?)?,
                c1_pre: decode_g1(f.take(3, "missing field 3 (C1pre)")?)?,
                proof: CompositeProof::from_value(f.take(4, "missing field 4 (proof)")?)?,
            })
        })
    }
}

impl CborValue for JoinResponse {
    fn to_value(&self) -> Value {
        map(vec![(1, self.certificate.to_value()), (2, encode_scalar(&self.esk_prov))])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(JoinResponse {
                certificate: SpsEqSignature::from_value(f.take(1, "missing field 1 (certificate)")?)?,
                esk_prov: decode_scalar(f.take(2, "missing field 2 (eskProv)")?)?,
            })
        })
    }
}

impl CborValue for EarnRequest {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_g1(&self.c0)),
            (2, encode_g1(&self.c1)),
            (3, self.certificate.to_value()),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(EarnRequest {
                c0: decode_g1(f.take(1, "missing field 1 (C0)")?)?,
                c1: decode_g1(f.take(2, "missing field 2 (C1)")?)?,
                certificate: SpsEqSignature::from_value(f.take(3, "missing field 3 (certificate)")?)?,
            })
        })
    }
}

impl CborValue for EarnResponse {
    fn to_value(&self) -> Value {
        map(vec![(1, self.certificate.to_value())])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(EarnResponse {
                certificate: SpsEqSignature::from_value(f.take(1, "missing field 1 (certificate)")?)?,
            })
        })
    }
}

/// ```text
/// EarnCoupon = { 1: basket_id, 2: [* uint], 3: request_digest, 4: CompositeProof }
/// ```
impl CborValue for EarnCoupon {
    fn to_value(&self) -> Value {
        map(vec![
            (1, Value::Bytes(self.basket_id.clone())),
            (2, Value::Array(self.delta.iter().map(|d| encode_u64(*d)).collect())),
            (3, Value::Bytes(self.request_digest.to_vec())),
            (4, self.proof.to_value()),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(EarnCoupon {
                basket_id: decode_bytes(f.take(1, "missing field 1 (basket id)")?)?,
                delta: decode_array(f.take(2, "missing field 2 (delta)")?)?
                    .into_iter()
                    .map(decode_u64)
                    .collect::<CborResult<_>>()?,
                request_digest: fixed::<32>(
                    f.take(3, "missing field 3 (request digest)")?,
                    "expected 32-byte digest",
                )?,
                proof: CompositeProof::from_value(f.take(4, "missing field 4 (proof)")?)?,
            })
        })
    }
}

const TREE_AND: u64 = 0;
const TREE_OR: u64 = 1;
const TREE_LEAF: u64 = 2;
const PREDICATE_LINEAR: u64 = 0;
const PREDICATE_RANGE: u64 = 1;

impl CborValue for PointsPredicate {
    fn to_value(&self) -> Value {
        match *self {
            PointsPredicate::LinearUpdate {
                index,
                factor,
                offset,
            } => map(vec![
                (1, encode_u64(PREDICATE_LINEAR)),
                (2, encode_u64(index as u64)),
                (3, encode_scalar(&factor)),
                (4, encode_scalar(&offset)),
            ]),
            PointsPredicate::Range {
                index,
                side,
                lower,
                upper,
            } => {
                let side = match side {
                    PointsSide::Old => 0,
                    PointsSide::New => 1,
                };
                let mut entries = vec![
                    (1, encode_u64(PREDICATE_RANGE)),
                    (2, encode_u64(index as u64)),
                    (5, encode_u64(side)),
                    (6, encode_u64(lower)),
                ];
                if let Some(upper) = upper {
                    entries.push((7, encode_u64(upper)));
                }
                map(entries)
            }
        }
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let kind = decode_u64(f.take(1, "missing field 1 (predicate kind)")?)?;
            let index = decode_usize(f.take(2, "missing field 2 (index)")?)?;
            match kind {
                PREDICATE_LINEAR => Ok(PointsPredicate::LinearUpdate {
                    index,
                    factor: decode_scalar(f.take(3, "missing field 3 (factor)")?)?,
                    offset: decode_scalar(f.take(4, "missing field 4 (offset)")?)?,
                }),
                PREDICATE_RANGE => {
                    let side = match decode_u64(f.take(5, "missing field 5 (side)")?)? {
                        0 => PointsSide::Old,
                        1 => PointsSide::New,
                        _ => return Err(CborError::InvalidValue("unknown points side")),
                    };
                    Ok(PointsPredicate::Range {
                        index,
                        side,
                        lower: decode_u64(f.take(6, "missing field 6 (lower)")?)?,
                        upper: f.take_optional(7).map(decode_u64).transpose()?,
                    })
                }
                _ => Err(CborError::InvalidValue("unknown predicate kind")),
            }
        })
    }
}

/// Witness flags are local to the prover and are not encoded.
///
/// ```text
/// SpendDeductTree = { 1: 0 / 1, 2: left, 3: right }   ; AND / OR
///                 / { 1: 2, 4: tstr, 5: PointsPredicate }
/// ```
impl CborValue for SpendDeductTree {
    fn to_value(&self) -> Value {
        match self {
            SpendDeductTree::And(l, r) => {
                map(vec![(1, encode_u64(TREE_AND)), (2, l.to_value()), (3, r.to_value())])
            }
            SpendDeductTree::Or(l, r) => {
                map(vec![(1, encode_u64(TREE_OR)), (2, l.to_value()), (3, r.to_value())])
            }
            SpendDeductTree::Leaf(leaf) => map(vec![
                (1, encode_u64(TREE_LEAF)),
                (4, Value::Text(leaf.name.clone())),
                (5, leaf.predicate.to_value()),
            ]),
        }
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let kind = decode_u64(f.take(1, "missing field 1 (node kind)")?)?;
            match kind {
                TREE_AND | TREE_OR => {
                    let l = Box::new(SpendDeductTree::from_value(f.take(2, "missing field 2 (left)")?)?);
                    let r = Box::new(SpendDeductTree::from_value(f.take(3, "missing field 3 (right)")?)?);
                    Ok(if kind == TREE_AND {
                        SpendDeductTree::And(l, r)
                    } else {
                        SpendDeductTree::Or(l, r)
                    })
                }
                TREE_LEAF => {
                    let Value::Text(name) = f.take(4, "missing field 4 (name)")? else {
                        return Err(CborError::InvalidStructure("expected text leaf name"));
                    };
                    Ok(SpendDeductTree::Leaf(SpendDeductLeaf {
                        name,
                        predicate: PointsPredicate::from_value(f.take(5, "missing field 5 (predicate)")?)?,
                        has_witness: None,
                    }))
                }
                _ => Err(CborError::InvalidValue("unknown tree node kind")),
            }
        })
    }
}

/// ```text
/// SpendRequest = { 1: basket_id, 2: dsid, 3: C0, 4: C1, 5: SpsEqSignature,
///                  6: C0pre, 7: C1pre, 8: gamma, 9: c0, 10: c1,
///                  11: [* ctrace0], 12: [* ctrace1], 13: [* V], 14: [* V'],
///                  15: { * tstr => [* G1] }, 16: CompositeProof,
///                  17: [* digit bit commitments] }
/// ```
impl CborValue for SpendRequest {
    fn to_value(&self) -> Value {
        let ranges = self
            .range_commitments
            .iter()
            .map(|(name, points)| (Value::Text(name.clone()), encode_g1s(points)))
            .collect();
        map(vec![
            (1, Value::Bytes(self.basket_id.clone())),
            (2, encode_g1(&self.dsid)),
            (3, encode_g1(&self.blinded_c0)),
            (4, encode_g1(&self.blinded_c1)),
            (5, self.certificate.to_value()),
            (6, encode_g1(&self.c0_pre)),
            (7, encode_g1(&self.c1_pre)),
            (8, encode_scalar(&self.gamma)),
            (9, encode_scalar(&self.tag_c0)),
            (10, encode_scalar(&self.tag_c1)),
            (11, encode_g1s(&self.ctrace0)),
            (12, encode_g1s(&self.ctrace1)),
            (13, encode_g1s(&self.old_commitments)),
            (14, encode_g1s(&self.new_commitments)),
            (15, Value::Map(ranges)),
            (16, self.proof.to_value()),
            (17, encode_g1s(&self.digit_commitments)),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let Value::Map(ranges) = f.take(15, "missing field 15 (range commitments)")? else {
                return Err(CborError::InvalidStructure("expected map of range commitments"));
            };
            let mut range_commitments = BTreeMap::new();
            for (name, points) in ranges {
                let Value::Text(name) = name else {
                    return Err(CborError::InvalidStructure("expected text key"));
                };
                if range_commitments.insert(name, decode_g1s(points)?).is_some() {
                    return Err(CborError::InvalidStructure("duplicate range commitment key"));
                }
            }
            Ok(SpendRequest {
                basket_id: decode_bytes(f.take(1, "missing field 1 (basket id)")?)?,
                dsid: decode_g1(f.take(2, "missing field 2 (dsid)")?)?,
                blinded_c0: decode_g1(f.take(3, "missing field 3 (C0)")?)?,
                blinded_c1: decode_g1(f.take(4, "missing field 4 (C1)")?)?,
                certificate: SpsEqSignature::from_value(f.take(5, "missing field 5 (certificate)")?)?,
                c0_pre: decode_g1(f.take(6, "missing field 6 (C0pre)")?)?,
                c1_pre: decode_g1(f.take(7, "missing field 7 (C1pre)")?)?,
                gamma: decode_scalar(f.take(8, "missing field 8 (gamma)")?)?,
                tag_c0: decode_scalar(f.take(9, "missing field 9 (c0)")?)?,
                tag_c1: decode_scalar(f.take(10, "missing field 10 (c1)")?)?,
                ctrace0: decode_g1s(f.take(11, "missing field 11 (ctrace0)")?)?,
                ctrace1: decode_g1s(f.take(12, "missing field 12 (ctrace1)")?)?,
                digit_commitments: decode_g1s(f.take(17, "missing field 17 (digit commitments)")?)?,
                old_commitments: decode_g1s(f.take(13, "missing field 13 (V)")?)?,
                new_commitments: decode_g1s(f.take(14, "missing field 14 (V')")?)?,
                range_commitments,
                proof: CompositeProof::from_value(f.take(16, "missing field 16 (proof)")?)?,
            })
        })
    }
}

impl CborValue for SpendResponse {
    fn to_value(&self) -> Value {
        map(vec![(1, self.certificate.to_value()), (2, encode_scalar(&self.esk_star_prov))])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            Ok(SpendResponse {
                certificate: SpsEqSignature::from_value(f.take(1, "missing field 1 (certificate)")?)?,
                esk_star_prov: decode_scalar(f.take(2, "missing field 2 (eskStarProv)")?)?,
            })
        })
    }
}

impl CborValue for DoubleSpendingTag {
    fn to_value(&self) -> Value {
        map(vec![
            (1, encode_scalar(&self.gamma)),
            (2, encode_scalar(&self.c0)),
            (3, encode_scalar(&self.c1)),
            (4, encode_scalar(&self.esk_star_prov)),
            (5, encode_g1s(&self.ctrace0)),
            (6, encode_g1s(&self.ctrace1)),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let tag = DoubleSpendingTag {
                gamma: decode_scalar(f.take(1, "missing field 1 (gamma)")?)?,
                c0: decode_scalar(f.take(2, "missing field 2 (c0)")?)?,
                c1: decode_scalar(f.take(3, "missing field 3 (c1)")?)?,
                esk_star_prov: decode_scalar(f.take(4, "missing field 4 (eskStarProv)")?)?,
                ctrace0: decode_g1s(f.take(5, "missing field 5 (ctrace0)")?)?,
                ctrace1: decode_g1s(f.take(6, "missing field 6 (ctrace1)")?)?,
            };
            if tag.ctrace0.len() != TRACE_DIGITS || tag.ctrace1.len() != TRACE_DIGITS {
                return Err(CborError::InvalidStructure("trace arrays wrong size"));
            }
            Ok(tag)
        })
    }
}

/// ```text
/// TransactionRecord = { 1: tid, 2: gamma, 3: promotion_id, 4: dsid, 5: DoubleSpendingTag, 6: bool }
/// ```
impl CborValue for TransactionRecord {
    fn to_value(&self) -> Value {
        map(vec![
            (1, Value::Bytes(self.id.tid.to_vec())),
            (2, Value::Bytes(self.id.gamma.to_vec())),
            (3, encode_scalar(&self.promotion_id)),
            (4, Value::Bytes(self.dsid.as_bytes().to_vec())),
            (5, self.tag.to_value()),
            (6, Value::Bool(self.valid)),
        ])
    }

    fn from_value(value: Value) -> CborResult<Self> {
        Fields::decode(value, |f| {
            let tid = fixed::<32>(f.take(1, "missing field 1 (tid)")?, "expected 32-byte tid")?;
            let gamma = fixed::<32>(f.take(2, "missing field 2 (gamma)")?, "expected 32-byte gamma")?;
            let promotion_id = decode_scalar(f.take(3, "missing field 3 (promotion id)")?)?;
            let dsid = DsId(fixed::<48>(f.take(4, "missing field 4 (dsid)")?, "expected 48-byte dsid")?);
            dsid.to_point()
                .map_err(|_| CborError::InvalidValue("invalid dsid"))?;
            let tag = DoubleSpendingTag::from_value(f.take(5, "missing field 5 (tag)")?)?;
            if tag.gamma.to_bytes() != gamma {
                return Err(CborError::InvalidValue("record gamma does not match its tag"));
            }
            let Value::Bool(valid) = f.take(6, "missing field 6 (valid)")? else {
                return Err(CborError::InvalidStructure("expected boolean validity"));
            };
            Ok(TransactionRecord {
                id: TransactionIdentifier { tid, gamma },
                promotion_id,
                dsid,
                tag,
                valid,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff::Field;
    use group::Curve;
    use rand_core::OsRng;

    fn params() -> PublicParameters {
        PublicParameters::new("test-org", "cbor", "test-env", "2024-01-01")
    }

    #[test]
    fn parameters_and_keys_round_trip() {
        let pp = params();
        assert_eq!(PublicParameters::from_cbor(&pp.to_cbor().unwrap()).unwrap(), pp);

        let provider = ProviderKeyPair::random(&pp, OsRng);
        let decoded = ProviderKeyPair::from_cbor(&provider.to_cbor().unwrap()).unwrap();
        assert!(decoded == provider);
        decoded.validate(&pp).unwrap();
        assert_eq!(
            ProviderPublicKey::from_cbor(&provider.public().to_cbor().unwrap()).unwrap(),
            *provider.public()
        );

        let user = UserKeyPair::random(&pp, OsRng);
        assert!(UserKeyPair::from_cbor(&user.to_cbor().unwrap()).unwrap() == user);
        let store = StoreKeyPair::random(&pp, OsRng);
        let decoded = StoreKeyPair::from_cbor(&store.to_cbor().unwrap()).unwrap();
        decoded.validate(&pp).unwrap();
        assert_eq!(
            StorePublicKey::from_cbor(&store.public().to_cbor().unwrap()).unwrap(),
            *store.public()
        );
    }

    #[test]
    fn trees_round_trip() {
        let tree = SpendDeductTree::or(
            SpendDeductTree::reward(0, 2, 5),
            SpendDeductTree::leaf(
                "vip",
                PointsPredicate::Range {
                    index: 1,
                    side: PointsSide::Old,
                    lower: 10,
                    upper: Some(20),
                },
            ),
        );
        assert_eq!(SpendDeductTree::from_cbor(&tree.to_cbor().unwrap()).unwrap(), tree);
    }

    #[test]
    fn non_canonical_scalar_is_rejected() {
        let bytes = encode_value(map(vec![
            (1, Value::Bytes(vec![0xff; 32])),
            (2, encode_u64(1)),
        ]));
        assert!(matches!(
            PromotionParameters::from_cbor(&bytes),
            Err(CborError::InvalidValue(_))
        ));
    }

    #[test]
    fn point_outside_the_curve_is_rejected() {
        let mut compressed = G1Affine::generator().to_compressed();
        compressed[47] ^= 1;
        let bytes = encode_value(map(vec![(1, Value::Bytes(compressed.to_vec()))]));
        assert!(UserPublicKey::from_cbor(&bytes).is_err());

        let valid = (G1Affine::generator() * Scalar::from(3u64)).to_affine();
        let bytes = encode_value(map(vec![(1, encode_g1(&valid))]));
        assert_eq!(UserPublicKey::from_cbor(&bytes).unwrap().upk, valid);
        let identity = encode_value(map(vec![(1, encode_g1(&G1Affine::identity()))]));
        assert!(UserPublicKey::from_cbor(&identity).is_ok());
    }

    #[test]
    fn missing_and_duplicate_fields() {
        let bytes = encode_value(map(vec![(1, encode_scalar(&Scalar::ONE))]));
        assert!(matches!(
            PromotionParameters::from_cbor(&bytes),
            Err(CborError::InvalidStructure("missing field 2 (points length)"))
        ));

        let duplicated = Value::Map(vec![
            (encode_u64(1), encode_scalar(&Scalar::ONE)),
            (encode_u64(1), encode_scalar(&Scalar::ONE)),
            (encode_u64(2), encode_u64(1)),
        ]);
        assert!(PromotionParameters::from_cbor(&encode_value(duplicated)).is_err());
        assert!(PromotionParameters::from_cbor(&encode_value(Value::Array(vec![]))).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let bytes = encode_value(map(vec![
            (1, encode_scalar(&Scalar::ONE)),
            (2, encode_u64(1)),
            (3, encode_u64(0)),
        ]));
        assert!(matches!(
            PromotionParameters::from_cbor(&bytes),
            Err(CborError::InvalidStructure("unknown map key"))
        ));

        // An AND node carries no challenges.
        let and = map(vec![
            (1, encode_u64(PROOF_AND)),
            (2, Value::Array(vec![])),
            (3, encode_scalars(&[Scalar::ONE])),
        ]);
        assert!(ProofNode::from_value(and).is_err());
    }

    #[test]
    fn malformed_proof_nodes() {
        let or = map(vec![
            (1, encode_u64(PROOF_OR)),
            (2, Value::Array(vec![])),
            (3, encode_scalars(&[Scalar::ONE])),
        ]);
        assert!(ProofNode::from_value(or).is_err());
        assert!(ProofNode::from_value(map(vec![(1, encode_u64(9))])).is_err());
    }

    fn encode_value(value: Value) -> Vec<u8> {
        let mut bytes = Vec::new();
        ciborium::into_writer(&value, &mut bytes).unwrap();
        bytes
    }
}
