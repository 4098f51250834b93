//! Shared fixtures: a small music catalogue registered from Rust types.

#![allow(dead_code)]

use std::sync::Arc;

use hyperdoc::{
    AccessError, AttrCapabilities, AttrKind, AttrSpec, AttrValue, IdKind, JoinType, LinkKinds,
    Registry, RegistryBuilder, RelSpec, ResourceTypeBuilder,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordCompany {
    pub id: Option<i64>,
    pub name: String,
    pub country_of_residence: Option<String>,
    pub tracks: Vec<MusicTrack>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MusicTrack {
    pub id: Option<String>,
    pub title: String,
    pub length_in_seconds: Option<i64>,
    pub genre: Option<String>,
    pub release_date: Option<String>,
    pub owned_by: Option<Box<RecordCompany>>,
    pub lyric: Option<Lyric>,
    pub performers: Vec<Performer>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lyric {
    pub id: Option<i64>,
    pub text: String,
    pub format: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Performer {
    pub id: Option<i64>,
    pub artist_name: String,
    pub born_at: Option<String>,
}

/// A performer with a public profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artist {
    pub performer: Performer,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: Option<i64>,
    pub name: String,
}

pub fn int_id(id: &str) -> Result<i64, AccessError> {
    id.parse()
        .map_err(|_| AccessError::new(format!("'{}' is not an integer id", id)))
}

pub fn builder() -> RegistryBuilder {
    RegistryBuilder::new()
        .resource(
            ResourceTypeBuilder::<RecordCompany>::new("recordCompanies", IdKind::Integer)
                .identity(
                    |c| c.id.map(|id| id.to_string()),
                    |c, id| {
                        c.id = Some(int_id(id)?);
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("name", AttrKind::Text),
                    |c| AttrValue::from(c.name.clone()),
                    |c, v| {
                        c.name = v.extract()?;
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("countryOfResidence", AttrKind::Text).nullable(),
                    |c| AttrValue::from(c.country_of_residence.clone()),
                    |c, v| {
                        c.country_of_residence = v.extract()?;
                        Ok(())
                    },
                )
                .to_many::<MusicTrack, _, _>(
                    RelSpec::new("tracks").inverse("ownedBy"),
                    |c| c.tracks.iter().collect(),
                    |c, tracks| c.tracks = tracks,
                ),
        )
        .resource(
            ResourceTypeBuilder::<MusicTrack>::new("musicTracks", IdKind::Uuid)
                .identity(
                    |t| t.id.clone(),
                    |t, id| {
                        t.id = Some(id.to_string());
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("title", AttrKind::Text),
                    |t| AttrValue::from(t.title.clone()),
                    |t, v| {
                        t.title = v.extract()?;
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("lengthInSeconds", AttrKind::Integer).nullable(),
                    |t| AttrValue::from(t.length_in_seconds),
                    |t, v| {
                        t.length_in_seconds = v.extract()?;
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("genre", AttrKind::Text).nullable(),
                    |t| AttrValue::from(t.genre.clone()),
                    |t, v| {
                        t.genre = v.extract()?;
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("releaseDate", AttrKind::Text)
                        .nullable()
                        .without(AttrCapabilities::CHANGE),
                    |t| AttrValue::from(t.release_date.clone()),
                    |t, v| {
                        t.release_date = v.extract()?;
                        Ok(())
                    },
                )
                .to_one::<RecordCompany, _, _>(
                    RelSpec::new("ownedBy").inverse("tracks"),
                    |t| t.owned_by.as_deref(),
                    |t, company| t.owned_by = company.map(Box::new),
                )
                .to_one::<Lyric, _, _>(
                    RelSpec::new("lyric").links(LinkKinds::RELATED),
                    |t| t.lyric.as_ref(),
                    |t, lyric| t.lyric = lyric,
                )
                .to_many::<Performer, _, _>(
                    RelSpec::new("performers"),
                    |t| t.performers.iter().collect(),
                    |t, performers| t.performers = performers,
                )
                .to_many::<Tag, _, _>(
                    RelSpec::new("tags")
                        .through("trackTags", "track", "tag")
                        .includable(false),
                    |t| t.tags.iter().collect(),
                    |t, tags| t.tags = tags,
                ),
        )
        .resource(
            ResourceTypeBuilder::<Lyric>::new("lyrics", IdKind::Integer)
                .identity(
                    |l| l.id.map(|id| id.to_string()),
                    |l, id| {
                        l.id = Some(int_id(id)?);
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("text", AttrKind::Text),
                    |l| AttrValue::from(l.text.clone()),
                    |l, v| {
                        l.text = v.extract()?;
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("format", AttrKind::Text).capabilities(AttrCapabilities::CREATE),
                    |l| AttrValue::from(l.format.clone()),
                    |l, v| {
                        l.format = v.extract()?;
                        Ok(())
                    },
                )
                .computed(AttrSpec::new("createdAt", AttrKind::Text), |l| {
                    AttrValue::from(l.created_at.clone())
                }),
        )
        .resource(
            ResourceTypeBuilder::<Performer>::new("performers", IdKind::Integer)
                .identity(
                    |p| p.id.map(|id| id.to_string()),
                    |p, id| {
                        p.id = Some(int_id(id)?);
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("artistName", AttrKind::Text),
                    |p| AttrValue::from(p.artist_name.clone()),
                    |p, v| {
                        p.artist_name = v.extract()?;
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("bornAt", AttrKind::Text).nullable(),
                    |p| AttrValue::from(p.born_at.clone()),
                    |p, v| {
                        p.born_at = v.extract()?;
                        Ok(())
                    },
                ),
        )
        .resource(
            ResourceTypeBuilder::<Artist>::new("artists", IdKind::Integer)
                .extends::<Performer>("performers", |a| &a.performer, |a| &mut a.performer)
                .attribute(
                    AttrSpec::new("website", AttrKind::Text).nullable(),
                    |a| AttrValue::from(a.website.clone()),
                    |a, v| {
                        a.website = v.extract()?;
                        Ok(())
                    },
                ),
        )
        .resource(
            ResourceTypeBuilder::<Tag>::new("tags", IdKind::Integer)
                .identity(
                    |t| t.id.map(|id| id.to_string()),
                    |t, id| {
                        t.id = Some(int_id(id)?);
                        Ok(())
                    },
                )
                .attribute(
                    AttrSpec::new("name", AttrKind::Text),
                    |t| AttrValue::from(t.name.clone()),
                    |t, v| {
                        t.name = v.extract()?;
                        Ok(())
                    },
                ),
        )
        .join(
            JoinType::new("trackTags")
                .navigation("track", "musicTracks")
                .navigation("tag", "tags"),
        )
}

pub fn registry() -> Registry {
    builder().build().expect("music registry builds")
}

pub fn shared_registry() -> Arc<Registry> {
    Arc::new(registry())
}

pub fn universal() -> RecordCompany {
    RecordCompany {
        id: Some(1),
        name: "Universal".into(),
        country_of_residence: Some("USA".into()),
        tracks: Vec::new(),
    }
}

pub fn yellow() -> MusicTrack {
    MusicTrack {
        id: Some("f2d4c1a0-8b7e-4c3d-9a1f-0e6b5c4d3a21".into()),
        title: "Yellow".into(),
        length_in_seconds: Some(269),
        genre: Some("Rock".into()),
        release_date: None,
        owned_by: Some(Box::new(universal())),
        lyric: Some(Lyric {
            id: Some(5),
            text: "Look at the stars".into(),
            format: "LRC".into(),
            created_at: "2000-06-26".into(),
        }),
        performers: vec![Performer {
            id: Some(9),
            artist_name: "Chris Martin".into(),
            born_at: None,
        }],
        tags: vec![Tag {
            id: Some(3),
            name: "britpop".into(),
        }],
    }
}
