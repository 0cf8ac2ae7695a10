use crate::metadata::{ImdbTitle, TmdbShow};
use crate::types::{DetailFields, Item, ItemStub, UNKNOWN_QUALITY};

pub const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";

/// Genres kept per record by the metadata sources.
pub const MAX_GENRES: usize = 2;

pub fn item_from_stub(stub: ItemStub, details: DetailFields) -> Item {
    Item {
        id: stub.id,
        titulo: stub.titulo,
        titulo_original: details.titulo_original,
        capa: Some(stub.capa),
        qualidade: stub.qualidade,
        descricao: details.descricao,
        generos: details.generos,
    }
}

pub fn item_from_tmdb(id: &str, show: TmdbShow) -> Option<Item> {
    let titulo = show.name.filter(|n| !n.trim().is_empty())?;
    Some(Item {
        id: id.to_string(),
        titulo,
        titulo_original: show.original_name.filter(|n| !n.trim().is_empty()),
        capa: show
            .poster_path
            .filter(|p| !p.is_empty())
            .map(|p| format!("{}{}", TMDB_IMAGE_BASE, p)),
        qualidade: "HD".to_string(),
        descricao: show.overview.unwrap_or_default(),
        generos: show.genres.into_iter().map(|g| g.name).take(MAX_GENRES).collect(),
    })
}

pub fn item_from_imdb(id: &str, title: ImdbTitle) -> Item {
    Item {
        id: id.to_string(),
        titulo: title.titulo,
        titulo_original: title.titulo_original,
        capa: title.capa,
        qualidade: title.qualidade.unwrap_or_else(|| UNKNOWN_QUALITY.to_string()),
        descricao: title.descricao,
        generos: title.generos.into_iter().take(MAX_GENRES).collect(),
    }
}
